//! Ephemeral scrape results: candidates live only for one scrape session.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::source_url::resolve_against;

/// Position of a candidate in the aggregated scrape results: index of the
/// URL outcome and index of the posting inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId {
    pub outcome: usize,
    pub item: usize,
}

impl CandidateId {
    pub fn new(outcome: usize, item: usize) -> Self {
        Self { outcome, item }
    }
}

/// Field names scrapers use for a posting's own link, checked in order.
const URL_FIELDS: &[&str] = &[
    "url",
    "link",
    "href",
    "apply_url",
    "detail_url",
    "application_url",
    "job_url",
    "opportunity_url",
    "source_url",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: CandidateId,
    /// Page the candidate was scraped from.
    pub source_url: String,
    pub fields: Map<String, JsonValue>,
}

fn url_like(value: &JsonValue) -> Option<&str> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| s.starts_with("http") || s.starts_with('/'))
}

impl CandidateRecord {
    pub fn new(id: CandidateId, source_url: impl Into<String>, fields: Map<String, JsonValue>) -> Self {
        Self {
            id,
            source_url: source_url.into(),
            fields,
        }
    }

    pub fn text_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.text_field("title")
    }

    /// The posting's own link as found on the candidate: known URL fields
    /// first, then any key mentioning url/link/href, then any absolute URL.
    pub fn detail_link(&self) -> Option<&str> {
        if let Some(found) = URL_FIELDS
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(url_like))
        {
            return Some(found);
        }

        if let Some(found) = self.fields.iter().find_map(|(key, value)| {
            let key = key.to_ascii_lowercase();
            if key.contains("url") || key.contains("link") || key.contains("href") {
                url_like(value)
            } else {
                None
            }
        }) {
            return Some(found);
        }

        self.fields.values().find_map(|value| {
            value
                .as_str()
                .map(str::trim)
                .filter(|s| s.starts_with("http"))
        })
    }

    /// Absolute URL that identifies this posting, falling back to the page it
    /// was scraped from.
    pub fn canonical_url(&self) -> String {
        self.detail_link()
            .and_then(|link| resolve_against(&self.source_url, link))
            .unwrap_or_else(|| self.source_url.clone())
    }
}

/// Options forwarded untouched to the scrape service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeOptions {
    pub model: String,
    #[serde(default)]
    pub use_pagination: bool,
    #[serde(default)]
    pub pagination_details: Option<String>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            use_pagination: false,
            pagination_details: None,
        }
    }
}

/// Result of scraping one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScrapeOutcome {
    Success {
        url: String,
        candidates: Vec<CandidateRecord>,
        #[serde(default)]
        pagination_urls: Vec<String>,
        #[serde(default)]
        cost: Option<f64>,
    },
    Failure {
        url: String,
        error: String,
    },
}

impl ScrapeOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Success { url, .. } | Self::Failure { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn candidates(&self) -> &[CandidateRecord] {
        match self {
            Self::Success { candidates, .. } => candidates,
            Self::Failure { .. } => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }
}
