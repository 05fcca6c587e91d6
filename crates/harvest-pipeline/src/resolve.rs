//! Idempotent content resolution: polished records are served from storage,
//! raw records go through the extractor.

use std::sync::Arc;

use chrono::Utc;
use harvest_core::{
    CleanedContent, ExtractedOpportunity, PolishSource, RawOpportunityContent, Section,
};
use harvest_storage::{OpportunityStore, StoreError};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::extract::SectionExtractor;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("opportunity {0} not found")]
    NotFound(Uuid),
    #[error("opportunity {0} is already polished")]
    AlreadyPolished(Uuid),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ResolveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::AlreadyPolished(id) => Self::AlreadyPolished(id),
            other => Self::Store(other),
        }
    }
}

/// Sections of a polished record exactly as stored. A record polished before
/// sections were tracked only has `raw_content`, which is surfaced as `extra`.
pub fn stored_content(record: &ExtractedOpportunity) -> CleanedContent {
    let mut sections = record.stored_sections();
    if sections.is_empty() {
        if let Some(raw) = record.raw_content.as_deref().filter(|r| !r.trim().is_empty()) {
            sections.set(Section::Extra, Some(raw.to_string()));
        }
    }
    CleanedContent::new(sections)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolishOutcome {
    pub record: ExtractedOpportunity,
    pub content: CleanedContent,
    /// False when the record was already polished and nothing was written.
    pub newly_polished: bool,
}

#[derive(Clone)]
pub struct ContentResolver {
    store: Arc<dyn OpportunityStore>,
    extractor: SectionExtractor,
}

impl ContentResolver {
    pub fn new(store: Arc<dyn OpportunityStore>, extractor: SectionExtractor) -> Self {
        Self { store, extractor }
    }

    pub fn extractor(&self) -> &SectionExtractor {
        &self.extractor
    }

    /// Content to display or edit. Never calls the model for a polished
    /// record.
    pub async fn resolve_content(&self, record: &ExtractedOpportunity) -> CleanedContent {
        if record.polish.is_polished() {
            debug!(id = %record.id, "serving polished content from storage");
            return stored_content(record);
        }
        self.extractor
            .extract(&RawOpportunityContent::from(record))
            .await
    }

    pub async fn resolve_by_id(&self, id: Uuid) -> Result<(ExtractedOpportunity, CleanedContent), ResolveError> {
        let record = self.store.get(id).await?.ok_or(ResolveError::NotFound(id))?;
        let content = self.resolve_content(&record).await;
        Ok((record, content))
    }

    /// Accept `cleaned` as the record's final content.
    pub async fn commit(
        &self,
        id: Uuid,
        cleaned: &CleanedContent,
        by: PolishSource,
    ) -> Result<ExtractedOpportunity, ResolveError> {
        let record = self
            .store
            .commit_polish(id, cleaned, by, Utc::now())
            .await?;
        info!(%id, by = ?record.polish.polished_by(), "content committed");
        Ok(record)
    }

    /// Resolve and commit in one step. A polished record is returned as
    /// stored, without a write.
    pub async fn polish(&self, id: Uuid) -> Result<PolishOutcome, ResolveError> {
        let record = self.store.get(id).await?.ok_or(ResolveError::NotFound(id))?;
        if record.polish.is_polished() {
            return Ok(self.unchanged(record));
        }

        let extraction = self
            .extractor
            .extract_detailed(&RawOpportunityContent::from(&record))
            .await;
        match self.commit(id, &extraction.content, extraction.source).await {
            Ok(record) => Ok(PolishOutcome {
                content: stored_content(&record),
                record,
                newly_polished: true,
            }),
            // Someone else committed first; their content wins.
            Err(ResolveError::AlreadyPolished(_)) => {
                let record = self.store.get(id).await?.ok_or(ResolveError::NotFound(id))?;
                Ok(self.unchanged(record))
            }
            Err(err) => Err(err),
        }
    }

    fn unchanged(&self, record: ExtractedOpportunity) -> PolishOutcome {
        PolishOutcome {
            content: stored_content(&record),
            record,
            newly_polished: false,
        }
    }
}
