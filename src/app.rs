use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::catalog::{catalog_from_path, CatalogItem};
use crate::config::Config;
use crate::extract::build_extractor;
use crate::recommender::Recommender;
use crate::semantic::{load_embedder, CatalogIndex, Embedder, IndexStorage, Ranker, StorageError};

/// Application paths structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub base_path: PathBuf,
}

/// Wires configuration, embedder, catalog and index into a `Recommender`.
pub struct AppFactory;

impl AppFactory {
    /// Get application paths, creating the base directory.
    ///
    /// `--base-path` wins over `ASSESSREC_BASE_PATH`, which wins over
    /// `~/.local/share/assessrec`.
    pub fn get_paths(base_override: Option<&Path>) -> Result<AppPaths> {
        let base_path = match base_override {
            Some(path) => path.to_path_buf(),
            None => Self::get_base_path()?,
        };

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    fn get_base_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("ASSESSREC_BASE_PATH") {
            return Ok(PathBuf::from(path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/assessrec"))
    }

    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        Config::load_with(&paths.base_path).context("failed to load config.yaml")
    }

    pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
        load_embedder(
            &config.model,
            config.base_path().to_path_buf(),
            Some(Duration::from_secs(config.download_timeout_secs)),
        )
        .with_context(|| format!("failed to load embedding model '{}'", config.model))
    }

    /// Read the catalog from `path`, or from the configured catalog file.
    pub fn load_catalog(config: &Config, path: Option<&Path>) -> Result<Vec<CatalogItem>> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| config.catalog_file());
        let source = catalog_from_path(&path);

        log::info!("loading catalog from {}", source.describe());
        source.load()
    }

    /// Embed `items` into a new index using the configured variants.
    pub fn build_index<'a>(
        config: &Config,
        embedder: &'a dyn Embedder,
        items: Vec<CatalogItem>,
        on_progress: impl Fn(usize, usize) + 'a,
    ) -> Result<CatalogIndex> {
        CatalogIndex::builder(embedder)
            .variants(&config.index.variants)
            .batch_size(config.index.batch_size)
            .on_progress(on_progress)
            .build(items)
            .context("failed to build index")
    }

    pub fn index_storage(config: &Config) -> IndexStorage {
        IndexStorage::new(config.index_path())
    }

    pub fn save_index(
        config: &Config,
        embedder: &dyn Embedder,
        index: &CatalogIndex,
    ) -> Result<()> {
        let storage = Self::index_storage(config);
        storage
            .save(index, &embedder.model_id_hash())
            .with_context(|| format!("failed to write {}", storage.path().display()))?;

        log::info!(
            "saved {} items / {} entries to {}",
            index.items().len(),
            index.entries().len(),
            storage.path().display()
        );
        Ok(())
    }

    /// Load the stored index. A missing index file is built from the catalog
    /// when one exists, otherwise the recommender starts with an empty index.
    pub fn load_index(config: &Config, embedder: &dyn Embedder) -> Result<CatalogIndex> {
        let storage = Self::index_storage(config);

        if storage.exists() {
            return match storage.load(&embedder.model_id_hash(), embedder.dimensions()) {
                Ok(index) => {
                    log::info!(
                        "loaded index with {} items from {}",
                        index.items().len(),
                        storage.path().display()
                    );
                    Ok(index)
                }
                Err(e @ (StorageError::ModelMismatch | StorageError::DimensionMismatch { .. })) => {
                    Err(e).context("index was built with another model, run `assessrec build`")
                }
                Err(e) => {
                    Err(e).with_context(|| format!("failed to read {}", storage.path().display()))
                }
            };
        }

        let catalog = config.catalog_file();
        if !catalog.exists() {
            log::warn!(
                "no index at {} and no catalog at {}, serving an empty index",
                storage.path().display(),
                catalog.display()
            );
            return Ok(CatalogIndex::empty(embedder.dimensions()));
        }

        log::info!("no index at {}, building from catalog", storage.path().display());
        let items = Self::load_catalog(config, None)?;
        let index = Self::build_index(config, embedder, items, |_, _| {})?;
        Self::save_index(config, embedder, &index)?;
        Ok(index)
    }

    /// Assemble a recommender around an already loaded index.
    pub fn create_recommender(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: CatalogIndex,
    ) -> Result<Recommender> {
        let ranker = Ranker::new(config.ranking.overfetch_factor, config.ranking.max_candidates)
            .with_min_score(config.ranking.min_score);
        let extractor = build_extractor(&config.extractor)?;

        Ok(Recommender::new(embedder, index)?
            .with_ranker(ranker)
            .with_extractor(extractor)
            .with_max_k(config.ranking.max_k)
            .with_index_options(&config.index.variants, config.index.batch_size))
    }

    pub fn open_recommender(config: &Config) -> Result<Recommender> {
        let embedder = Self::create_embedder(config)?;
        let index = Self::load_index(config, embedder.as_ref())?;
        Self::create_recommender(config, embedder, index)
    }
}
