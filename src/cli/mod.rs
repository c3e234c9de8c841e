use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about = "Recommend assessments for a job description", long_about = None)]
pub struct Args {
    /// Data directory holding config.yaml, the catalog and the index.
    /// Defaults to $ASSESSREC_BASE_PATH or ~/.local/share/assessrec
    #[clap(long, global = true)]
    pub base_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed the catalog and write the index file
    Build {
        /// Catalog file (.json or .csv). Defaults to `catalog_path` from config
        #[clap(short, long)]
        catalog: Option<PathBuf>,
    },

    /// Recommend assessments for a job description or job posting URL
    Recommend {
        /// Free text or a URL
        query: String,

        /// Number of results
        #[clap(short, long)]
        k: Option<usize>,

        /// Treat the query as text even if it looks like a URL
        #[clap(long, conflicts_with = "url")]
        text: bool,

        /// Treat the query as a URL
        #[clap(long)]
        url: bool,

        /// Print results as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Start the HTTP API
    Serve {
        /// Address to listen on, overrides `server.bind_addr`
        #[clap(short, long)]
        bind: Option<String>,
    },

    /// Score the recommender against labeled queries (JSON or YAML)
    Evaluate {
        file: PathBuf,

        /// Cut-off for Recall@K, MAP@K and NDCG@K
        #[clap(short, long, default_value = "3")]
        k: usize,

        /// Print the report as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Check that the index file is readable and matches the configured model
    Verify {},
}
