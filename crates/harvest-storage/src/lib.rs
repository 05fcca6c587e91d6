//! Outbound HTTP plumbing and the opportunity persistence gateway.

pub mod http;
mod memory;
mod postgres;
mod store;

pub use http::{BackoffPolicy, FetchError, HttpClientConfig, JsonHttpClient};
pub use memory::{MemoryStore, ScrapedRow};
pub use postgres::PgStore;
pub use store::{
    BulkSaveReport, CompletedExtraction, FieldPatch, ItemFailure, ListFilter,
    NewScrapedOpportunity, OpportunityStore, Page, RecordMutation, StoreError,
};

pub const CRATE_NAME: &str = "harvest-storage";
