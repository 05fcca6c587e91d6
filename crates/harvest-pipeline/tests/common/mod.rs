#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use harvest_adapters::{AdapterError, ModelError, ScrapeService, ScrapedPage, TextModel};
use harvest_core::ScrapeOptions;
use harvest_pipeline::{Harvest, SectionExtractor};
use harvest_storage::{FetchError, MemoryStore};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::Notify;

pub enum Reply {
    Json(String),
    Fail,
}

/// Language model double that counts its calls.
pub struct SpyModel {
    reply: Reply,
    calls: AtomicUsize,
}

impl SpyModel {
    pub fn replying(json: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Json(json.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Fail,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextModel for SpyModel {
    fn model_id(&self) -> &str {
        "spy-model"
    }

    async fn complete_json(&self, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Json(json) => Ok(json.clone()),
            Reply::Fail => Err(ModelError::Fetch(FetchError::HttpStatus {
                status: 503,
                url: "https://llm.example.org/v1/chat/completions".into(),
                snippet: "overloaded".into(),
            })),
        }
    }
}

/// Lets a test hold the scrape service inside a call.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct StubScraper {
    pages: HashMap<String, Result<ScrapedPage, String>>,
    raw: HashMap<String, Result<String, String>>,
    gate: Option<Arc<Gate>>,
    pub scrape_calls: AtomicUsize,
    pub raw_calls: AtomicUsize,
}

pub fn object(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("object expected, got {other}"),
    }
}

impl StubScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, items: Vec<JsonValue>) -> Self {
        let page = ScrapedPage {
            items: items.into_iter().map(object).collect(),
            pagination_urls: vec![],
            cost: Some(0.001),
        };
        self.pages.insert(url.to_string(), Ok(page));
        self
    }

    pub fn failing_page(mut self, url: &str, error: &str) -> Self {
        self.pages.insert(url.to_string(), Err(error.to_string()));
        self
    }

    pub fn raw(mut self, url: &str, text: &str) -> Self {
        self.raw.insert(url.to_string(), Ok(text.to_string()));
        self
    }

    pub fn failing_raw(mut self, url: &str, error: &str) -> Self {
        self.raw.insert(url.to_string(), Err(error.to_string()));
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn scrape_calls(&self) -> usize {
        self.scrape_calls.load(Ordering::SeqCst)
    }

    pub fn raw_calls(&self) -> usize {
        self.raw_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeService for StubScraper {
    async fn scrape_fields(
        &self,
        url: &str,
        _fields: &[String],
        _options: &ScrapeOptions,
    ) -> Result<ScrapedPage, AdapterError> {
        self.scrape_calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url) {
            Some(Ok(page)) => Ok(page.clone()),
            Some(Err(message)) => Err(AdapterError::service(url, message.clone())),
            None => Err(AdapterError::service(url, "unknown url")),
        }
    }

    async fn raw_content(&self, url: &str) -> Result<String, AdapterError> {
        self.raw_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        match self.raw.get(url) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(message)) => Err(AdapterError::service(url, message.clone())),
            None => Err(AdapterError::service(url, "unknown url")),
        }
    }
}

pub struct Fixture {
    pub harvest: Harvest,
    pub store: Arc<MemoryStore>,
    pub scraper: Arc<StubScraper>,
}

pub fn harvest(scraper: StubScraper, model: Option<Arc<SpyModel>>, polish_on_extract: bool) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let scraper = Arc::new(scraper);
    let model = model.map(|m| m as Arc<dyn TextModel>);
    let harvest = Harvest::assemble(
        store.clone(),
        scraper.clone(),
        SectionExtractor::new(model),
        polish_on_extract,
    );
    Fixture {
        harvest,
        store,
        scraper,
    }
}

pub fn posting_text(title: &str) -> String {
    format!(
        "Toggle navigation\nWe use cookies to improve your experience.\n{title}\n\
         The post holder coordinates field monitoring across three provinces and reports to the country lead.\n\
         Requirements\n1. Degree in public health\n2. Five years of field work\nApply now\nFacebook"
    )
}

pub fn extractor_with(model: &Arc<SpyModel>) -> SectionExtractor {
    let model: Arc<dyn TextModel> = model.clone();
    SectionExtractor::new(Some(model))
}
