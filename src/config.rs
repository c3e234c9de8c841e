use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::{
    EmbedVariant, DEFAULT_MAX_CANDIDATES, DEFAULT_MODEL, DEFAULT_OVERFETCH_FACTOR,
};

const CONFIG_FILE: &str = "config.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_K: usize = 10;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_EXTRACT_MAX_CHARS: usize = 4000;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Result-count limits and candidate pool tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Largest `k` a caller may request
    #[serde(default = "default_max_k")]
    pub max_k: usize,

    /// `k` used when the caller gives none
    #[serde(default = "default_max_k")]
    pub default_k: usize,

    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Drop results below this cosine similarity
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_k: DEFAULT_MAX_K,
            default_k: DEFAULT_MAX_K,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            min_score: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Texts embedded per catalog item
    #[serde(default = "default_variants")]
    pub variants: Vec<EmbedVariant>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            variants: default_variants(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Plain page text
    #[default]
    Html,
    /// Page text condensed into a search query by a chat model
    Llm,
    /// URL queries are rejected
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API root
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
        }
    }
}

/// URL-to-text extraction settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default)]
    pub kind: ExtractorKind,

    #[serde(default = "default_extract_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound on extracted text length
    #[serde(default = "default_extract_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Block requests to private/loopback IPs
    #[serde(default = "default_true")]
    pub block_private_ips: bool,

    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,

    #[serde(default)]
    pub blocked_hosts: Vec<String>,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: ExtractorKind::default(),
            timeout_secs: DEFAULT_EXTRACT_TIMEOUT_SECS,
            max_chars: DEFAULT_EXTRACT_MAX_CHARS,
            user_agent: default_user_agent(),
            block_private_ips: true,
            allowed_schemes: default_allowed_schemes(),
            blocked_hosts: vec![],
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Allow any origin
    #[serde(default = "default_true")]
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2", "hash")
    #[serde(default = "default_model")]
    pub model: String,

    /// Catalog file, relative to the base path unless absolute
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            catalog_path: default_catalog_path(),
            index_file: default_index_file(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            ranking: RankingConfig::default(),
            index: IndexConfig::default(),
            extractor: ExtractorConfig::default(),
            server: ServerConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_catalog_path() -> String {
    "catalog.json".to_string()
}

fn default_index_file() -> String {
    "vectors.bin".to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_max_k() -> usize {
    DEFAULT_MAX_K
}

fn default_overfetch_factor() -> usize {
    DEFAULT_OVERFETCH_FACTOR
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

fn default_variants() -> Vec<EmbedVariant> {
    vec![EmbedVariant::Full]
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_extract_timeout_secs() -> u64 {
    DEFAULT_EXTRACT_TIMEOUT_SECS
}

fn default_extract_max_chars() -> usize {
    DEFAULT_EXTRACT_MAX_CHARS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("model", "must not be empty"));
        }

        if self.download_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "download_timeout_secs",
                "must be greater than 0",
            ));
        }

        let ranking = &self.ranking;
        if ranking.max_k == 0 {
            return Err(ConfigError::invalid("ranking.max_k", "must be at least 1"));
        }
        if ranking.default_k == 0 || ranking.default_k > ranking.max_k {
            return Err(ConfigError::invalid(
                "ranking.default_k",
                format!("must be between 1 and {}, got {}", ranking.max_k, ranking.default_k),
            ));
        }
        if ranking.overfetch_factor == 0 {
            return Err(ConfigError::invalid(
                "ranking.overfetch_factor",
                "must be at least 1",
            ));
        }
        if ranking.max_candidates == 0 {
            return Err(ConfigError::invalid(
                "ranking.max_candidates",
                "must be at least 1",
            ));
        }
        if let Some(min_score) = ranking.min_score {
            if !(-1.0..=1.0).contains(&min_score) {
                return Err(ConfigError::invalid(
                    "ranking.min_score",
                    format!("must be between -1.0 and 1.0, got {min_score}"),
                ));
            }
        }

        if self.index.variants.is_empty() {
            return Err(ConfigError::invalid("index.variants", "must not be empty"));
        }
        if self.index.batch_size == 0 {
            return Err(ConfigError::invalid("index.batch_size", "must be at least 1"));
        }

        let extractor = &self.extractor;
        if extractor.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "extractor.timeout_secs",
                "must be greater than 0",
            ));
        }
        if extractor.max_chars == 0 {
            return Err(ConfigError::invalid("extractor.max_chars", "must be at least 1"));
        }
        if extractor.allowed_schemes.is_empty() {
            return Err(ConfigError::invalid(
                "extractor.allowed_schemes",
                "must list at least one scheme",
            ));
        }

        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid(
                "server.bind_addr",
                format!("'{}' is not a socket address", self.server.bind_addr),
            ));
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path).map_err(io_err)?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?).map_err(io_err)?;
            log::info!("wrote default config to {}", path.display());
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str).map_err(|source| ConfigError::Io { path, source })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a configured path against the base path.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.resolve_path(&self.catalog_path)
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve_path(&self.index_file)
    }
}
