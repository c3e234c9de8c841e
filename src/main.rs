use clap::Parser;
use tracing_subscriber::EnvFilter;

use assessrec::{
    app::AppFactory,
    cli::{self, Command},
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths(args.base_path.as_deref())?;
    let config = AppFactory::create_config(&paths)?;

    match args.command {
        Command::Build { catalog } => cli::handle_build(&config, catalog.as_deref()),

        Command::Recommend {
            query,
            k,
            text,
            url,
            json,
        } => cli::handle_recommend(&config, query, k, text, url, json),

        Command::Serve { bind } => cli::handle_serve(config, bind),

        Command::Evaluate { file, k, json } => cli::handle_evaluate(&config, &file, k, json),

        Command::Verify {} => cli::handle_verify(&config),
    }
}
