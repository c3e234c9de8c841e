//! URL-to-text extraction.
//!
//! A query that looks like a URL is handed to a `TextExtractor`, which turns
//! the page behind it into text worth embedding. Extraction is a single
//! attempt; failures surface to the caller untouched.

mod html;
mod llm;

use std::sync::Arc;

use anyhow::Context;

use crate::config::{ExtractorConfig, ExtractorKind};

pub use html::{page_text, HtmlExtractor, UrlPolicy};
pub use llm::LlmExtractor;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL blocked by policy: {0}")]
    Blocked(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("content type '{0}' is not HTML")]
    NotHtml(String),

    #[error("page has no readable text")]
    Empty,

    #[error("language model request failed: {0}")]
    Llm(String),
}

/// Turns the page at a URL into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, url: &str) -> Result<String, ExtractError>;
}

/// Structural URL check, no network access: an absolute http(s) URL with a
/// host and no embedded whitespace.
pub fn looks_like_url(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        return false;
    }

    match url::Url::parse(text) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Build the configured extractor; `None` when URL queries are disabled.
pub fn build_extractor(config: &ExtractorConfig) -> anyhow::Result<Option<Arc<dyn TextExtractor>>> {
    match config.kind {
        ExtractorKind::None => Ok(None),
        ExtractorKind::Html => {
            let extractor = HtmlExtractor::new(config).context("failed to build HTML extractor")?;
            Ok(Some(Arc::new(extractor)))
        }
        ExtractorKind::Llm => {
            let api_key = std::env::var(&config.llm.api_key_env).with_context(|| {
                format!("LLM extractor needs an API key in ${}", config.llm.api_key_env)
            })?;
            let extractor =
                LlmExtractor::new(config, api_key).context("failed to build LLM extractor")?;
            Ok(Some(Arc::new(extractor)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_url() {
        assert!(looks_like_url("https://jobs.example.com/jobs/21819?lang=en-us"));
        assert!(looks_like_url("  http://example.com  "));

        assert!(!looks_like_url("Java developer with SQL, 40 minutes"));
        assert!(!looks_like_url("http developers wanted"));
        assert!(!looks_like_url("ftp://example.com/file"));
        assert!(!looks_like_url("https://example.com/a b"));
        assert!(!looks_like_url("example.com/jobs"));
        assert!(!looks_like_url(""));
    }

    #[test]
    fn test_build_extractor_none() {
        let config = ExtractorConfig {
            kind: ExtractorKind::None,
            ..Default::default()
        };
        assert!(build_extractor(&config).unwrap().is_none());
    }

    #[test]
    fn test_build_extractor_html() {
        assert!(build_extractor(&ExtractorConfig::default()).unwrap().is_some());
    }

    #[test]
    fn test_build_llm_extractor_requires_key() {
        let mut config = ExtractorConfig {
            kind: ExtractorKind::Llm,
            ..Default::default()
        };
        config.llm.api_key_env = "ASSESSREC_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(build_extractor(&config).is_err());
    }
}
