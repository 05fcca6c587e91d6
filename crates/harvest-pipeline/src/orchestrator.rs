use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use harvest_adapters::ScrapeService;
use harvest_core::{CandidateId, CandidateRecord, ScrapeOptions, ScrapeOutcome};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

/// Cooperative cancellation, checked before each URL.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one URL is required")]
    NoUrls,
    #[error("at least one field is required")]
    NoFields,
}

pub const CANCELLED: &str = "cancelled";

fn non_blank(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct ScrapeOrchestrator {
    scraper: Arc<dyn ScrapeService>,
}

impl ScrapeOrchestrator {
    pub fn new(scraper: Arc<dyn ScrapeService>) -> Self {
        Self { scraper }
    }

    /// Scrape every URL in order, one outcome per URL. A failing URL never
    /// stops the run.
    pub async fn scrape_all(
        &self,
        urls: &[String],
        fields: &[String],
        options: &ScrapeOptions,
        cancel: &CancelFlag,
    ) -> Result<Vec<ScrapeOutcome>, ValidationError> {
        let fields = non_blank(fields);
        if non_blank(urls).is_empty() {
            return Err(ValidationError::NoUrls);
        }
        if fields.is_empty() {
            return Err(ValidationError::NoFields);
        }

        // Blank entries keep their slot so outcome indexes match the input.
        let mut outcomes = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().map(|u| u.trim().to_string()).enumerate() {
            if cancel.is_cancelled() {
                outcomes.push(ScrapeOutcome::Failure {
                    url,
                    error: CANCELLED.to_string(),
                });
                continue;
            }
            let span = info_span!("scrape_url", index, url = %url);
            let outcome = self.scrape_one(index, url, &fields, options).instrument(span).await;
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(total = outcomes.len(), failed, "scrape run finished");
        Ok(outcomes)
    }

    async fn scrape_one(
        &self,
        index: usize,
        url: String,
        fields: &[String],
        options: &ScrapeOptions,
    ) -> ScrapeOutcome {
        if !url.starts_with("http") {
            warn!("skipping invalid url");
            return ScrapeOutcome::Failure {
                url,
                error: "invalid url".to_string(),
            };
        }

        match self.scraper.scrape_fields(&url, fields, options).await {
            Ok(page) => {
                let candidates = page
                    .items
                    .into_iter()
                    .enumerate()
                    .map(|(item, fields)| {
                        CandidateRecord::new(CandidateId::new(index, item), url.clone(), fields)
                    })
                    .collect::<Vec<_>>();
                info!(candidates = candidates.len(), "url scraped");
                ScrapeOutcome::Success {
                    url,
                    candidates,
                    pagination_urls: page.pagination_urls,
                    cost: page.cost,
                }
            }
            Err(err) => {
                warn!(error = %err, "url failed");
                ScrapeOutcome::Failure {
                    url,
                    error: err.to_string(),
                }
            }
        }
    }
}
