use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::app::AppFactory;
use crate::config::Config;
use crate::eval::{evaluate, load_queries, EvalReport};
use crate::recommender::{Query, QueryKind};
use crate::semantic::{document_text, RankedResult, SearchIndex};

pub fn handle_build(config: &Config, catalog: Option<&Path>) -> Result<()> {
    let items = AppFactory::load_catalog(config, catalog)?;
    if items.is_empty() {
        bail!("catalog has no usable items");
    }

    let embedder = AppFactory::create_embedder(config)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} embedding [{bar:40}] {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("=> "),
    );

    let index = AppFactory::build_index(config, embedder.as_ref(), items, |done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    })?;
    bar.finish_and_clear();

    AppFactory::save_index(config, embedder.as_ref(), &index)?;

    println!(
        "indexed {} items ({} entries, {} dimensions) with {}",
        index.item_count(),
        index.entry_count(),
        index.dimensions(),
        embedder.name()
    );
    Ok(())
}

pub fn handle_recommend(
    config: &Config,
    query: String,
    k: Option<usize>,
    text: bool,
    url: bool,
    json: bool,
) -> Result<()> {
    let recommender = AppFactory::open_recommender(config)?;

    let kind = match (text, url) {
        (true, _) => QueryKind::Text,
        (_, true) => QueryKind::Url,
        _ => QueryKind::Auto,
    };
    let query = Query::new(query, k.unwrap_or(config.ranking.default_k)).with_kind(kind);

    let results = recommender.recommend(&query)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("no recommendations");
        return Ok(());
    }

    print_results(&results);
    Ok(())
}

fn print_results(results: &[RankedResult]) {
    for (rank, result) in results.iter().enumerate() {
        let item = &result.item;
        println!("{:>2}. {:.3}  {}", rank + 1, result.score, item.name);
        println!("      {}", item.url);

        let details = ["duration", "test_type", "remote_testing", "adaptive_irt_support"]
            .iter()
            .filter(|key| !item.meta(key).is_empty())
            .map(|key| format!("{key}: {}", item.meta(key)))
            .collect::<Vec<_>>();
        if !details.is_empty() {
            println!("      {}", details.join(" | "));
        }
    }
}

pub fn handle_serve(config: Config, bind: Option<String>) -> Result<()> {
    let mut config = config;
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }
    config.validate()?;

    let recommender = AppFactory::open_recommender(&config)?;
    crate::web::start_daemon(config, recommender)
}

pub fn handle_evaluate(config: &Config, file: &Path, k: usize, json: bool) -> Result<()> {
    let queries = load_queries(file)?;
    let recommender = AppFactory::open_recommender(config)?;

    if k == 0 || k > recommender.max_k() {
        bail!("k must be between 1 and {}", recommender.max_k());
    }

    let report = evaluate(&recommender, &queries, k);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &EvalReport) {
    let k = report.k;
    for score in &report.queries {
        println!("Query: {}", score.query);
        match &score.error {
            Some(error) => println!("  error: {error}"),
            None => println!(
                "  Recall@{k}: {:.2}, AP@{k}: {:.2}, NDCG@{k}: {:.2}",
                score.recall, score.average_precision, score.ndcg
            ),
        }
    }
    println!();
    println!("Mean Recall@{k}: {:.2}", report.mean_recall);
    println!("MAP@{k}: {:.2}", report.map);
    println!("Mean NDCG@{k}: {:.2}", report.mean_ndcg);
}

pub fn handle_verify(config: &Config) -> Result<()> {
    let storage = AppFactory::index_storage(config);
    if !storage.exists() {
        bail!("no index at {}, run `assessrec build`", storage.path().display());
    }

    let info = storage
        .info()
        .with_context(|| format!("failed to read {}", storage.path().display()))?;
    println!("index file:  {}", storage.path().display());
    println!("format:      v{}", info.version);
    println!("built at:    {}", info.built_at_rfc3339());
    println!("items:       {}", info.item_count);
    println!("entries:     {}", info.entry_count);
    println!("dimensions:  {}", info.dimensions);

    let embedder = AppFactory::create_embedder(config)?;
    if info.model_id != embedder.model_id_hash() {
        bail!("index was built with a different model than '{}'", embedder.name());
    }

    let index = storage
        .load(&embedder.model_id_hash(), embedder.dimensions())
        .context("index failed to load")?;
    println!("model:       {} (ok)", embedder.name());

    // self-retrieval spot check on the first item, with the text it was indexed under
    if let Some(item) = index.items().first() {
        let text = config
            .index
            .variants
            .iter()
            .find_map(|&variant| document_text(item, variant))
            .with_context(|| format!("item '{}' has no indexable text", item.id))?;

        let query = embedder.embed(&text)?;
        let hits = index.search(&query, 1)?;
        let top = hits.first().map(|h| h.id.as_str()).unwrap_or_default();
        if top != item.id {
            bail!("spot check failed: '{}' retrieved '{top}' instead of itself", item.id);
        }
        println!("spot check:  '{}' (ok)", item.id);
    }

    Ok(())
}
