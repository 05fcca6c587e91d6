//! Persistence gateway for extracted opportunities and saved scrape rows.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use harvest_core::{
    CleanedContent, ExtractedOpportunity, ExtractionStatus, OpportunityType, PolishSource,
    PolishState, StatusTransitionError,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opportunity {0} not found")]
    NotFound(Uuid),
    #[error("an opportunity already exists for {0}")]
    Conflict(String),
    #[error("opportunity {0} is already polished")]
    AlreadyPolished(Uuid),
    #[error(transparent)]
    Transition(#[from] StatusTransitionError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    pub opportunity_type: Option<OpportunityType>,
    pub status: Option<ExtractionStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            opportunity_type: None,
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl ListFilter {
    pub fn matches(&self, record: &ExtractedOpportunity) -> bool {
        self.opportunity_type.map_or(true, |t| t == record.opportunity_type)
            && self.status.map_or(true, |s| s == record.extraction_status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Values written when a pending extraction finishes successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedExtraction {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    pub job_type: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub description: Option<String>,
    pub raw_content: Option<String>,
    pub structured_content: Option<Map<String, JsonValue>>,
    pub model_used: Option<String>,
    pub extraction_cost: Option<f64>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Manual edit of a record. A key that is present (even as `null`) is
/// written; absent keys are left alone. Polish state is not editable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub company: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub salary_range: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub job_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub deadline: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub responsibilities: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub requirements: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub qualifications: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub benefits: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub application_instructions: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub contact_info: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub additional_info: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub raw_content: Option<Option<String>>,
}

fn assign<T: Clone>(slot: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *slot = value.clone();
    }
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        *self == FieldPatch::default()
    }

    pub fn apply(&self, record: &mut ExtractedOpportunity) {
        if let Some(title) = self.title.as_ref().filter(|t| !t.trim().is_empty()) {
            record.title = title.clone();
        }
        assign(&mut record.company, &self.company);
        assign(&mut record.location, &self.location);
        assign(&mut record.salary_range, &self.salary_range);
        assign(&mut record.job_type, &self.job_type);
        assign(&mut record.deadline, &self.deadline);
        assign(&mut record.description, &self.description);
        assign(&mut record.responsibilities, &self.responsibilities);
        assign(&mut record.requirements, &self.requirements);
        assign(&mut record.qualifications, &self.qualifications);
        assign(&mut record.benefits, &self.benefits);
        assign(&mut record.application_instructions, &self.application_instructions);
        assign(&mut record.contact_info, &self.contact_info);
        assign(&mut record.additional_info, &self.additional_info);
        assign(&mut record.raw_content, &self.raw_content);
    }
}

/// A raw scrape candidate kept as-is (the bulk "save" action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScrapedOpportunity {
    pub title: String,
    pub opportunity_type: OpportunityType,
    pub source_url: String,
    pub details: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub title: String,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BulkSaveReport {
    pub saved: usize,
    pub total: usize,
    pub saved_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemFailure>,
}

/// Why a scraped row cannot be saved, if anything.
pub(crate) fn scraped_item_problem(item: &NewScrapedOpportunity) -> Option<String> {
    if item.title.trim().is_empty() {
        return Some("missing title".to_string());
    }
    if !item.source_url.trim().starts_with("http") {
        return Some(format!("invalid source url `{}`", item.source_url));
    }
    None
}

pub type RecordMutation<'a> =
    &'a (dyn Fn(&mut ExtractedOpportunity) -> Result<(), StoreError> + Send + Sync);

pub(crate) fn polish_commit(
    record: &mut ExtractedOpportunity,
    cleaned: &CleanedContent,
    by: &PolishSource,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    if record.polish.is_polished() {
        return Err(StoreError::AlreadyPolished(record.id));
    }
    record.apply_sections(cleaned.sections());
    let combined = cleaned.combined_plain_text();
    record.raw_content = (!combined.is_empty()).then(|| combined.to_string());
    record.polish = PolishState::Polished { at, by: by.clone() };
    Ok(())
}

#[async_trait]
pub trait OpportunityStore: Send + Sync {
    /// Insert a new row. Fails with `Conflict` when a row with the same
    /// normalized source URL exists.
    async fn insert(&self, record: ExtractedOpportunity) -> Result<ExtractedOpportunity, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<ExtractedOpportunity>, StoreError>;

    async fn find_by_source_url(&self, url: &str) -> Result<Option<ExtractedOpportunity>, StoreError>;

    async fn list(&self, filter: ListFilter) -> Result<Page<ExtractedOpportunity>, StoreError>;

    /// Load, mutate and write back one row atomically. `updated_at` is
    /// refreshed by the store.
    async fn update_with(
        &self,
        id: Uuid,
        mutate: RecordMutation<'_>,
    ) -> Result<ExtractedOpportunity, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn save_scraped(&self, batch: Vec<NewScrapedOpportunity>) -> Result<BulkSaveReport, StoreError>;

    async fn advance_status(
        &self,
        id: Uuid,
        next: ExtractionStatus,
    ) -> Result<ExtractedOpportunity, StoreError> {
        self.update_with(id, &|record| {
            record.extraction_status.advance(next)?;
            Ok(())
        })
        .await
    }

    async fn complete_extraction(
        &self,
        id: Uuid,
        done: CompletedExtraction,
        at: DateTime<Utc>,
    ) -> Result<ExtractedOpportunity, StoreError> {
        self.update_with(id, &|record| {
            record.extraction_status.advance(ExtractionStatus::Completed)?;
            if let Some(title) = done.title.as_ref().filter(|t| !t.trim().is_empty()) {
                record.title = title.clone();
            }
            record.company = done.company.clone();
            record.location = done.location.clone();
            record.salary_range = done.salary_range.clone();
            record.job_type = done.job_type.clone();
            record.deadline = done.deadline;
            record.description = done.description.clone();
            record.raw_content = done.raw_content.clone();
            record.structured_content = done.structured_content.clone();
            record.model_used = done.model_used.clone();
            record.extraction_cost = done.extraction_cost;
            record.extraction_error = None;
            record.extracted_at = Some(at);
            Ok(())
        })
        .await
    }

    async fn fail_extraction(
        &self,
        id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<ExtractedOpportunity, StoreError> {
        let error = error.to_string();
        self.update_with(id, &|record| {
            record.extraction_status.advance(ExtractionStatus::Failed)?;
            record.extraction_error = Some(error.clone());
            record.extracted_at = Some(at);
            Ok(())
        })
        .await
    }

    async fn update_fields(
        &self,
        id: Uuid,
        patch: &FieldPatch,
    ) -> Result<ExtractedOpportunity, StoreError> {
        self.update_with(id, &|record| {
            patch.apply(record);
            Ok(())
        })
        .await
    }

    /// Accept `cleaned` as final: section columns and `raw_content` are
    /// overwritten and the record becomes `Polished`. One way only.
    async fn commit_polish(
        &self,
        id: Uuid,
        cleaned: &CleanedContent,
        by: PolishSource,
        at: DateTime<Utc>,
    ) -> Result<ExtractedOpportunity, StoreError> {
        self.update_with(id, &|record| polish_commit(record, cleaned, &by, at))
            .await
    }
}
