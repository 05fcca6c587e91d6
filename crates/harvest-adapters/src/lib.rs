//! Boundaries to the external collaborators: the raw scrape service, the
//! language-model text service and the saved-sources registry.

pub mod fixture;
pub mod model;
pub mod scrape;
pub mod sources;

use harvest_storage::FetchError;
use thiserror::Error;

pub use fixture::FixtureScrapeService;
pub use model::{ModelError, OpenAiChatModel, TextModel};
pub use scrape::{HttpScrapeService, ScrapeService, ScrapedPage};
pub use sources::{SavedSource, SourceRegistry, DEFAULT_SCRAPE_FIELDS};

pub const CRATE_NAME: &str = "harvest-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The service answered but reported `success: false`.
    #[error("scrape service failed for {url}: {message}")]
    Service { url: String, message: String },
}

impl AdapterError {
    pub fn service(url: &str, message: impl Into<String>) -> Self {
        Self::Service {
            url: url.to_string(),
            message: message.into(),
        }
    }
}
