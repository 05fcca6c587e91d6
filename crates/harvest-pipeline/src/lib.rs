//! Extraction pipeline: section extractor, content resolver, scrape
//! orchestrator and batch operations, wired from `HarvestConfig`.

pub mod batch;
pub mod config;
pub mod extract;
pub mod main_info;
pub mod orchestrator;
pub mod resolve;

use std::sync::Arc;

use anyhow::Result;
use harvest_adapters::ScrapeService;
use harvest_core::ScrapeOptions;
use harvest_storage::OpportunityStore;
use tracing::info;

pub use batch::{
    BatchError, BatchExtractReport, BatchExtractor, BatchManager, ExtractRequestItem, ItemError,
    ItemResult, ItemStatus, NullProgress, Progress, ProgressLog, ProgressSink, WorkingSet,
};
pub use config::HarvestConfig;
pub use extract::{Extraction, SectionExtractor};
pub use orchestrator::{CancelFlag, ScrapeOrchestrator, ValidationError};
pub use resolve::{ContentResolver, PolishOutcome, ResolveError};

pub const CRATE_NAME: &str = "harvest-pipeline";

/// Every pipeline component sharing one store and one scrape service.
#[derive(Clone)]
pub struct Harvest {
    pub store: Arc<dyn OpportunityStore>,
    pub orchestrator: ScrapeOrchestrator,
    pub resolver: ContentResolver,
    pub batch: Arc<BatchManager>,
}

impl Harvest {
    pub fn assemble(
        store: Arc<dyn OpportunityStore>,
        scraper: Arc<dyn ScrapeService>,
        extractor: SectionExtractor,
        polish_on_extract: bool,
    ) -> Self {
        let resolver = ContentResolver::new(store.clone(), extractor);
        let batch_extractor = BatchExtractor::new(store.clone(), scraper.clone(), resolver.clone())
            .with_options(ScrapeOptions::default())
            .with_polish_on_extract(polish_on_extract);
        Self {
            orchestrator: ScrapeOrchestrator::new(scraper),
            batch: Arc::new(BatchManager::new(store.clone(), batch_extractor)),
            resolver,
            store,
        }
    }

    pub async fn from_config(config: &HarvestConfig) -> Result<Self> {
        let http = config.build_http_client()?;
        let store = config.open_store().await?;
        let scraper = config.scrape_service(&http);
        let extractor = SectionExtractor::new(config.text_model(&http));
        info!(model = extractor.has_model(), "pipeline assembled");
        Ok(Self::assemble(store, scraper, extractor, config.polish_on_extract))
    }
}
