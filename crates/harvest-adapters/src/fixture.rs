//! Offline scrape service backed by captured JSON fixtures.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use harvest_core::{normalize_source_url, ScrapeOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::scrape::{ScrapeService, ScrapedPage};
use crate::AdapterError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturePack {
    pub fixture_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub pages: Vec<FixturePage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturePage {
    pub url: String,
    #[serde(default)]
    pub items: Vec<Map<String, JsonValue>>,
    #[serde(default)]
    pub pagination_urls: Vec<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub raw_content: Option<String>,
    /// Path of a text file holding the raw content, relative to the pack.
    #[serde(default)]
    pub raw_content_path: Option<String>,
    /// When set, every call for this page fails with this message.
    #[serde(default)]
    pub error: Option<String>,
}

pub fn load_fixture_pack(path: impl AsRef<Path>) -> Result<FixturePack> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut pack: FixturePack =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    hydrate_raw_content(path, &mut pack)?;
    Ok(pack)
}

fn hydrate_raw_content(pack_path: &Path, pack: &mut FixturePack) -> Result<()> {
    let base = pack_path.parent().unwrap_or_else(|| Path::new("."));
    for page in &mut pack.pages {
        if page.raw_content.is_some() {
            continue;
        }
        let Some(rel_path) = &page.raw_content_path else {
            continue;
        };
        let raw_path = base.join(rel_path);
        let raw = fs::read_to_string(&raw_path)
            .with_context(|| format!("reading fixture raw content {}", raw_path.display()))?;
        page.raw_content = Some(raw);
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct FixtureScrapeService {
    pages: HashMap<String, FixturePage>,
}

impl FixtureScrapeService {
    pub fn new(pages: impl IntoIterator<Item = FixturePage>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|page| (normalize_source_url(&page.url), page))
                .collect(),
        }
    }

    pub fn from_pack(pack: FixturePack) -> Self {
        Self::new(pack.pages)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_fixture_pack(path).map(Self::from_pack)
    }

    fn page(&self, url: &str) -> Result<&FixturePage, AdapterError> {
        let page = self
            .pages
            .get(&normalize_source_url(url))
            .ok_or_else(|| AdapterError::service(url, "no fixture captured for url"))?;
        match &page.error {
            Some(message) => Err(AdapterError::service(url, message.clone())),
            None => Ok(page),
        }
    }
}

#[async_trait]
impl ScrapeService for FixtureScrapeService {
    async fn scrape_fields(
        &self,
        url: &str,
        fields: &[String],
        _options: &ScrapeOptions,
    ) -> Result<ScrapedPage, AdapterError> {
        let page = self.page(url)?;
        // The real service only returns requested fields.
        let items = page
            .items
            .iter()
            .map(|item| {
                item.iter()
                    .filter(|(key, _)| fields.iter().any(|f| f == *key))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .collect();
        Ok(ScrapedPage {
            items,
            pagination_urls: page.pagination_urls.clone(),
            cost: page.cost,
        })
    }

    async fn raw_content(&self, url: &str) -> Result<String, AdapterError> {
        Ok(self.page(url)?.raw_content.clone().unwrap_or_default())
    }
}
