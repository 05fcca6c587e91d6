//! Saved scrape sources, read from `sources.yaml` at the workspace root.

use std::path::Path;

use anyhow::{Context, Result};
use harvest_core::{OpportunityType, ScrapeOptions};
use serde::{Deserialize, Serialize};

/// Fields requested when a source does not list its own.
pub const DEFAULT_SCRAPE_FIELDS: &[&str] = &[
    "title",
    "company",
    "location",
    "description",
    "url",
    "job_type",
    "salary_range",
    "deadline",
];

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    pub opportunity_type: OpportunityType,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub use_pagination: bool,
    #[serde(default)]
    pub pagination_details: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub is_active: bool,
}

impl SavedSource {
    pub fn effective_fields(&self) -> Vec<String> {
        if self.fields.is_empty() {
            DEFAULT_SCRAPE_FIELDS.iter().map(|f| f.to_string()).collect()
        } else {
            self.fields.clone()
        }
    }

    pub fn scrape_options(&self, model: &str) -> ScrapeOptions {
        ScrapeOptions {
            model: model.to_string(),
            use_pagination: self.use_pagination,
            pagination_details: self.pagination_details.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub sources: Vec<SavedSource>,
}

impl SourceRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let registry: Self = serde_yaml::from_str(&yaml)
            .with_context(|| format!("parsing {}", path.display()))?;
        for source in &registry.sources {
            anyhow::ensure!(
                source.url.trim().starts_with("http"),
                "source `{}` has an invalid url `{}`",
                source.name,
                source.url
            );
        }
        Ok(registry)
    }

    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        Self::load(root.join("sources.yaml"))
    }

    pub fn find(&self, name: &str) -> Option<&SavedSource> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn active(&self) -> impl Iterator<Item = &SavedSource> {
        self.sources.iter().filter(|s| s.is_active)
    }
}
