//! Text preparation for embedding.
//!
//! Catalog documents:
//! 1. Pick the fields for the requested variant
//! 2. Trim and skip empty fields
//! 3. Concatenate with labels
//! 4. Truncate to max length with ellipsis
//!
//! Queries are trimmed, whitespace-collapsed and truncated the same way.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;

/// Maximum document length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 1024;

/// Maximum query length for embedding input (characters, not tokens)
const MAX_QUERY_LENGTH: usize = 2048;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Which text of an item gets embedded. An item indexed under several
/// variants owns several index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedVariant {
    /// Every descriptive field of the item, catalog url included
    Full,
    Description,
    Name,
}

impl EmbedVariant {
    pub fn as_u8(self) -> u8 {
        match self {
            EmbedVariant::Full => 0,
            EmbedVariant::Description => 1,
            EmbedVariant::Name => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EmbedVariant::Full),
            1 => Some(EmbedVariant::Description),
            2 => Some(EmbedVariant::Name),
            _ => None,
        }
    }
}

/// Build the text embedded for `item` under `variant`.
///
/// Returns `None` if the variant's fields are all empty after trimming.
pub fn document_text(item: &CatalogItem, variant: EmbedVariant) -> Option<String> {
    let content = match variant {
        EmbedVariant::Name => item.name.trim().to_string(),
        EmbedVariant::Description => item.description.trim().to_string(),
        EmbedVariant::Full => {
            let fields = [
                ("Assessment Name", item.name.as_str()),
                ("Description", item.description.as_str()),
                ("URL", item.url.as_str()),
                ("Duration", item.meta("duration")),
                ("Languages", item.meta("languages")),
                ("Job Level", item.meta("job_level")),
                ("Remote Testing", item.meta("remote_testing")),
                ("Adaptive/IRT", item.meta("adaptive_irt_support")),
                ("Test Type", item.meta("test_type")),
            ];

            fields
                .iter()
                .map(|(label, value)| (label, value.trim()))
                .filter(|(_, value)| !value.is_empty())
                .map(|(label, value)| format!("{label}: {value}."))
                .collect::<Vec<_>>()
                .join(" ")
        }
    };

    if content.is_empty() {
        return None;
    }

    Some(truncate_content(&content, MAX_CONTENT_LENGTH))
}

/// Normalize raw query text: trim, collapse runs of whitespace, truncate.
///
/// Returns `None` if nothing but whitespace is left.
pub fn normalize_query(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return None;
    }

    Some(truncate_content(&collapsed, MAX_QUERY_LENGTH))
}

/// Truncate content to `max_chars` characters, adding ellipsis if truncated.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    // count chars, not bytes, so multi-byte sequences are never split
    let keep = max_chars.saturating_sub(TRUNCATION_SUFFIX.len());
    let truncated: String = content.chars().take(keep).collect();

    format!("{}{}", truncated.trim_end(), TRUNCATION_SUFFIX)
}
