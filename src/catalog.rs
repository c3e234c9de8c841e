//! Assessment catalog: item model and file-backed catalog sources.
//!
//! Two on-disk formats are understood:
//! - JSON: a list of objects as produced by the catalog scraper
//!   (`name`, `url`, `description`, `duration`, `languages`, `job_level`,
//!   `remote_testing`, `adaptive/irt_support`, `test_type`, optional `id`)
//! - CSV: a header row with the same column names

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Metadata keys copied from a raw record, paired with the source column
/// names that may carry them.
const METADATA_FIELDS: &[(&str, &[&str])] = &[
    ("duration", &["duration"]),
    ("languages", &["languages"]),
    ("job_level", &["job_level"]),
    ("remote_testing", &["remote_testing"]),
    ("adaptive_irt_support", &["adaptive/irt_support", "adaptive_irt_support"]),
    ("test_type", &["test_type"]),
];

/// A single recommendable assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Stable unique identifier
    pub id: String,
    pub name: String,
    /// Source text for embedding
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CatalogItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            url: url.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata value for `key`, or an empty string.
    pub fn meta(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Build an item from a flat string record.
    ///
    /// Returns `None` when `name`, `url` or `description` is missing or blank.
    /// The id is the explicit `id` column when present, otherwise the url.
    fn from_record(record: &BTreeMap<String, String>) -> Option<Self> {
        let field = |key: &str| {
            record
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let name = field("name")?;
        let url = field("url")?;
        let description = field("description")?;
        let id = field("id").unwrap_or_else(|| url.clone());

        let mut metadata = BTreeMap::new();
        for (key, sources) in METADATA_FIELDS {
            if let Some(value) = sources.iter().find_map(|s| field(*s)) {
                metadata.insert(key.to_string(), value);
            }
        }

        Some(Self {
            id,
            name,
            description,
            url,
            metadata,
        })
    }
}

/// Supplies the catalog at index-build time.
pub trait CatalogSource {
    fn load(&self) -> anyhow::Result<Vec<CatalogItem>>;

    /// Human readable origin, used in logs.
    fn describe(&self) -> String;
}

/// Catalog stored as a JSON array of objects.
pub struct JsonCatalog {
    path: PathBuf,
}

impl JsonCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse catalog JSON from a string.
    pub fn parse(data: &str) -> anyhow::Result<Vec<CatalogItem>> {
        let value: serde_json::Value =
            serde_json::from_str(data).context("catalog is not valid JSON")?;

        let serde_json::Value::Array(records) = value else {
            bail!("catalog JSON must be a list of assessments");
        };

        let mut raw = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            match record {
                serde_json::Value::Object(map) => {
                    let flat = map
                        .into_iter()
                        .map(|(k, v)| (k, stringify(v)))
                        .collect::<BTreeMap<_, _>>();
                    raw.push(Some(flat));
                }
                _ => {
                    log::warn!("skipping invalid catalog record at index {idx}");
                    raw.push(None);
                }
            }
        }

        Ok(collect_items(raw))
    }
}

impl CatalogSource for JsonCatalog {
    fn load(&self) -> anyhow::Result<Vec<CatalogItem>> {
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read catalog {}", self.path.display()))?;
        Self::parse(&data)
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// Catalog stored as CSV with a header row.
pub struct CsvCatalog {
    path: PathBuf,
}

impl CsvCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<CatalogItem>> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers().context("catalog CSV has no header row")?.clone();

        let mut raw = vec![];
        for (idx, row) in rdr.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    log::warn!("skipping unreadable catalog row {}: {err}", idx + 1);
                    raw.push(None);
                    continue;
                }
            };

            let flat = headers
                .iter()
                .zip(row.iter())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>();
            raw.push(Some(flat));
        }

        Ok(collect_items(raw))
    }
}

impl CatalogSource for CsvCatalog {
    fn load(&self) -> anyhow::Result<Vec<CatalogItem>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open catalog {}", self.path.display()))?;
        Self::parse(file)
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

/// Pick a catalog source from the file extension (`.csv`, anything else is JSON).
pub fn catalog_from_path(path: &Path) -> Box<dyn CatalogSource> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        Box::new(CsvCatalog::new(path))
    } else {
        Box::new(JsonCatalog::new(path))
    }
}

fn collect_items(raw: Vec<Option<BTreeMap<String, String>>>) -> Vec<CatalogItem> {
    let mut items = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();

    for (idx, record) in raw.into_iter().enumerate() {
        let Some(record) = record else { continue };

        match CatalogItem::from_record(&record) {
            Some(item) => {
                // rejected later by the index build
                if !seen.insert(item.id.clone()) {
                    log::warn!("catalog record {idx} repeats id {:?}", item.id);
                }
                items.push(item);
            }
            None => log::warn!("skipping incomplete catalog record at index {idx}"),
        }
    }

    items
}

fn stringify(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(values) => values
            .into_iter()
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
