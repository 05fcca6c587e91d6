//! Working-set selection and the bulk save / extract / delete actions.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use harvest_adapters::{ScrapeService, ScrapedPage};
use harvest_core::{
    slice_opportunity_section, CandidateId, CandidateRecord, ExtractedOpportunity,
    ExtractionStatus, OpportunityType, ScrapeOptions, ScrapeOutcome,
};
use harvest_storage::{
    BulkSaveReport, CompletedExtraction, NewScrapedOpportunity, OpportunityStore, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::main_info::MainInfo;
use crate::orchestrator::{CancelFlag, CANCELLED};
use crate::resolve::ContentResolver;

pub const UNTITLED: &str = "Untitled Opportunity";

/// Seconds after which an untouched `processing` row is treated as abandoned.
pub const STALE_PROCESSING_SECS: i64 = 15 * 60;

/// Aggregated scrape results of one session plus the user's selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingSet {
    outcomes: Vec<ScrapeOutcome>,
    selected: BTreeSet<CandidateId>,
}

impl WorkingSet {
    pub fn new(outcomes: Vec<ScrapeOutcome>) -> Self {
        Self {
            outcomes,
            selected: BTreeSet::new(),
        }
    }

    pub fn outcomes(&self) -> &[ScrapeOutcome] {
        &self.outcomes
    }

    pub fn candidates(&self) -> impl Iterator<Item = &CandidateRecord> {
        self.outcomes.iter().flat_map(|o| o.candidates().iter())
    }

    pub fn candidate(&self, id: CandidateId) -> Option<&CandidateRecord> {
        self.outcomes
            .get(id.outcome)
            .and_then(|o| o.candidates().get(id.item))
    }

    pub fn len(&self) -> usize {
        self.candidates().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flip one candidate's selection. Returns whether it is now selected;
    /// unknown ids are ignored.
    pub fn toggle(&mut self, id: CandidateId) -> bool {
        if self.candidate(id).is_none() {
            return false;
        }
        if self.selected.remove(&id) {
            false
        } else {
            self.selected.insert(id);
            true
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self.candidates().map(|c| c.id).collect();
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: CandidateId) -> bool {
        self.selected.contains(&id)
    }

    pub fn selected_ids(&self) -> Vec<CandidateId> {
        self.selected.iter().copied().collect()
    }

    /// Selected candidates in result order.
    pub fn selected(&self) -> Vec<&CandidateRecord> {
        self.selected
            .iter()
            .filter_map(|id| self.candidate(*id))
            .collect()
    }

    /// Drop the selected candidates from the session. Every URL keeps its
    /// outcome; surviving candidates are renumbered and the selection is
    /// cleared. Nothing is persisted.
    pub fn bulk_delete(&mut self) -> usize {
        let mut removed = 0;
        for (index, outcome) in self.outcomes.iter_mut().enumerate() {
            let ScrapeOutcome::Success { candidates, .. } = outcome else {
                continue;
            };
            let before = candidates.len();
            candidates.retain(|c| !self.selected.contains(&c.id));
            removed += before - candidates.len();
            for (item, candidate) in candidates.iter_mut().enumerate() {
                candidate.id = CandidateId::new(index, item);
            }
        }
        self.selected.clear();
        removed
    }

    pub fn reset(&mut self) {
        self.outcomes.clear();
        self.selected.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

pub trait ProgressSink: Send {
    fn report(&mut self, progress: Progress);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _progress: Progress) {}
}

/// Keeps every update, for callers that render progress after the fact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressLog(pub Vec<Progress>);

impl ProgressSink for ProgressLog {
    fn report(&mut self, progress: Progress) {
        self.0.push(progress);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRequestItem {
    pub title: String,
    pub url: String,
    pub opportunity_type: OpportunityType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Extracted,
    AlreadyExtracted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub status: ItemStatus,
    pub polished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub title: String,
    pub url: String,
    pub error: String,
}

/// Tally of one batch. `extracted + already_extracted + failed == total`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchExtractReport {
    pub extracted: usize,
    pub already_extracted: usize,
    pub failed: usize,
    pub total: usize,
    pub results: Vec<ItemResult>,
    pub errors: Vec<ItemError>,
}

/// Per-item outcome before it is folded into the report.
enum ItemOutcome {
    Done(ItemResult),
    Failed(ItemError),
}

fn item_error(item: &ExtractRequestItem, id: Option<Uuid>, error: impl Into<String>) -> ItemOutcome {
    ItemOutcome::Failed(ItemError {
        id,
        title: item.title.clone(),
        url: item.url.clone(),
        error: error.into(),
    })
}

/// Batch extraction entry point: fetch, normalize and persist each posting.
#[derive(Clone)]
pub struct BatchExtractor {
    store: Arc<dyn OpportunityStore>,
    scraper: Arc<dyn ScrapeService>,
    resolver: ContentResolver,
    options: ScrapeOptions,
    polish_on_extract: bool,
    stale_after: Duration,
}

/// Releases a claimed row if the item is dropped before it settles, so the
/// URL is not left `processing`.
struct ClaimGuard {
    store: Arc<dyn OpportunityStore>,
    id: Uuid,
    armed: bool,
}

impl ClaimGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(id = %self.id, "extraction interrupted outside a runtime; row left as is");
            return;
        };
        let store = self.store.clone();
        let id = self.id;
        warn!(%id, "extraction interrupted; releasing claimed row");
        runtime.spawn(async move {
            if let Err(err) = store.delete(id).await {
                warn!(%id, error = %err, "could not release interrupted row");
            }
        });
    }
}

impl BatchExtractor {
    pub fn new(
        store: Arc<dyn OpportunityStore>,
        scraper: Arc<dyn ScrapeService>,
        resolver: ContentResolver,
    ) -> Self {
        Self {
            store,
            scraper,
            resolver,
            options: ScrapeOptions::default(),
            polish_on_extract: true,
            stale_after: Duration::seconds(STALE_PROCESSING_SECS),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_options(mut self, options: ScrapeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_polish_on_extract(mut self, enabled: bool) -> Self {
        self.polish_on_extract = enabled;
        self
    }

    pub async fn extract_batch(
        &self,
        items: Vec<ExtractRequestItem>,
        progress: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> BatchExtractReport {
        let mut report = BatchExtractReport {
            total: items.len(),
            ..Default::default()
        };

        for (index, item) in items.iter().enumerate() {
            let outcome = if cancel.is_cancelled() {
                item_error(item, None, CANCELLED)
            } else {
                let span = info_span!("extract_item", index, url = %item.url);
                self.extract_one(item).instrument(span).await
            };
            match outcome {
                ItemOutcome::Done(result) => {
                    match result.status {
                        ItemStatus::Extracted => report.extracted += 1,
                        ItemStatus::AlreadyExtracted => report.already_extracted += 1,
                    }
                    report.results.push(result);
                }
                ItemOutcome::Failed(error) => {
                    warn!(url = %error.url, error = %error.error, "item failed");
                    report.failed += 1;
                    report.errors.push(error);
                }
            }
            progress.report(Progress {
                current: index + 1,
                total: report.total,
            });
        }

        info!(
            total = report.total,
            extracted = report.extracted,
            already_extracted = report.already_extracted,
            failed = report.failed,
            "batch extraction finished"
        );
        report
    }

    async fn extract_one(&self, item: &ExtractRequestItem) -> ItemOutcome {
        let url = item.url.trim();
        if !url.starts_with("http") {
            return item_error(item, None, "Invalid URL");
        }

        let record = match self.claim(item, url).await {
            Ok(Claim::Existing(record)) => {
                return ItemOutcome::Done(ItemResult {
                    id: record.id,
                    title: record.title,
                    url: item.url.clone(),
                    status: ItemStatus::AlreadyExtracted,
                    polished: record.polish.is_polished(),
                });
            }
            Ok(Claim::Fresh(record)) => record,
            Err(outcome) => return outcome,
        };

        let guard = ClaimGuard {
            store: self.store.clone(),
            id: record.id,
            armed: true,
        };
        let completed = self.extract_claimed(item, url, record).await;
        guard.disarm();
        let record = match completed {
            Ok(record) => record,
            Err(outcome) => return outcome,
        };

        let mut polished = false;
        if self.polish_on_extract {
            match self.resolver.polish(record.id).await {
                Ok(outcome) => polished = outcome.record.polish.is_polished(),
                Err(err) => warn!(error = %err, "polish after extraction failed; record left raw"),
            }
        }

        ItemOutcome::Done(ItemResult {
            id: record.id,
            title: record.title,
            url: item.url.clone(),
            status: ItemStatus::Extracted,
            polished,
        })
    }

    /// Fetch and persist one claimed row. The row ends `completed` or
    /// `failed` unless the store itself is failing.
    async fn extract_claimed(
        &self,
        item: &ExtractRequestItem,
        url: &str,
        record: ExtractedOpportunity,
    ) -> Result<ExtractedOpportunity, ItemOutcome> {
        let id = record.id;
        if record.extraction_status == ExtractionStatus::Pending {
            if let Err(err) = self.store.advance_status(id, ExtractionStatus::Processing).await {
                return Err(item_error(item, Some(id), err.to_string()));
            }
        }

        let raw = match self.scraper.raw_content(url).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "raw content unavailable");
                String::new()
            }
        };
        let fields = item
            .opportunity_type
            .main_info_fields()
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>();
        let main = self.scraper.scrape_fields(url, &fields, &self.options).await;

        let page = match main {
            Ok(page) => page,
            Err(err) if raw.trim().is_empty() => {
                return Err(self.fail(item, id, err.to_string()).await);
            }
            Err(err) => {
                warn!(error = %err, "main info unavailable; keeping raw content only");
                ScrapedPage::default()
            }
        };

        let done = self.completed_extraction(item, &raw, page);
        match self.store.complete_extraction(id, done, Utc::now()).await {
            Ok(record) => Ok(record),
            Err(err) => Err(self.fail(item, id, err.to_string()).await),
        }
    }

    /// Mark the row failed and report the item. A row that cannot be marked
    /// stays `processing` until it goes stale.
    async fn fail(&self, item: &ExtractRequestItem, id: Uuid, message: String) -> ItemOutcome {
        if let Err(store_err) = self.store.fail_extraction(id, &message, Utc::now()).await {
            warn!(error = %store_err, "could not record failed extraction");
        }
        item_error(item, Some(id), message)
    }

    /// Find or create the row for `url`. Completed rows are never redone;
    /// stale `processing` rows are taken over.
    async fn claim(&self, item: &ExtractRequestItem, url: &str) -> Result<Claim, ItemOutcome> {
        let existing = self
            .store
            .find_by_source_url(url)
            .await
            .map_err(|err| item_error(item, None, err.to_string()))?;

        match existing {
            Some(record) => match record.extraction_status {
                ExtractionStatus::Completed => Ok(Claim::Existing(record)),
                ExtractionStatus::Pending => Ok(Claim::Fresh(record)),
                ExtractionStatus::Processing if Utc::now() - record.updated_at >= self.stale_after => {
                    warn!(id = %record.id, "taking over stale processing row");
                    Ok(Claim::Fresh(record))
                }
                ExtractionStatus::Processing => {
                    Err(item_error(item, Some(record.id), "extraction already in progress"))
                }
                ExtractionStatus::Failed => Err(item_error(
                    item,
                    Some(record.id),
                    "previous extraction failed; delete the record to retry",
                )),
            },
            None => {
                let title = Some(item.title.trim())
                    .filter(|t| !t.is_empty())
                    .unwrap_or(UNTITLED);
                let pending =
                    ExtractedOpportunity::pending(title, url, item.opportunity_type, Utc::now());
                match self.store.insert(pending).await {
                    Ok(record) => Ok(Claim::Fresh(record)),
                    Err(StoreError::Conflict(_)) => {
                        Err(item_error(item, None, "another extraction created this record first"))
                    }
                    Err(err) => Err(item_error(item, None, err.to_string())),
                }
            }
        }
    }

    fn completed_extraction(
        &self,
        item: &ExtractRequestItem,
        raw: &str,
        page: ScrapedPage,
    ) -> CompletedExtraction {
        let sliced = slice_opportunity_section(raw, &item.title);
        let body = Some(if sliced.trim().is_empty() { raw } else { sliced.as_str() })
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        let data = page.items.into_iter().next().unwrap_or_default();
        let info = MainInfo::from_scraped(&data);

        let mut structured: Map<String, JsonValue> = data;
        structured.insert("raw_content_length".into(), raw.chars().count().into());
        structured.insert("filtered_content_length".into(), sliced.chars().count().into());

        CompletedExtraction {
            title: info.title,
            company: info.company,
            location: info.location,
            salary_range: info.salary_range,
            job_type: info.job_type,
            deadline: info.deadline,
            description: body.clone(),
            raw_content: body,
            structured_content: Some(structured),
            model_used: Some(format!("raw-content + {}", self.options.model)),
            extraction_cost: Some(page.cost.unwrap_or(0.0)),
        }
    }
}

enum Claim {
    Existing(ExtractedOpportunity),
    Fresh(ExtractedOpportunity),
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no opportunities selected")]
    EmptySelection,
    #[error("another batch operation is still running")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs bulk actions over a working set, one at a time.
pub struct BatchManager {
    store: Arc<dyn OpportunityStore>,
    extractor: BatchExtractor,
    in_flight: Mutex<()>,
}

impl BatchManager {
    pub fn new(store: Arc<dyn OpportunityStore>, extractor: BatchExtractor) -> Self {
        Self {
            store,
            extractor,
            in_flight: Mutex::new(()),
        }
    }

    pub fn extractor(&self) -> &BatchExtractor {
        &self.extractor
    }

    /// Keep the selected candidates as raw scraped rows.
    pub async fn bulk_save(
        &self,
        set: &mut WorkingSet,
        opportunity_type: OpportunityType,
    ) -> Result<BulkSaveReport, BatchError> {
        if set.selected.is_empty() {
            return Err(BatchError::EmptySelection);
        }
        let _guard = self.in_flight.try_lock().map_err(|_| BatchError::Busy)?;

        let batch = set
            .selected()
            .into_iter()
            .map(|candidate| {
                let mut details = candidate.fields.clone();
                details.insert("scraped_from".into(), candidate.source_url.clone().into());
                NewScrapedOpportunity {
                    title: candidate.title().unwrap_or(UNTITLED).to_string(),
                    opportunity_type,
                    source_url: candidate.canonical_url(),
                    details,
                }
            })
            .collect::<Vec<_>>();

        let report = self.store.save_scraped(batch).await?;
        info!(saved = report.saved, total = report.total, "selection saved");
        set.deselect_all();
        Ok(report)
    }

    /// Run batch extraction over the selected candidates.
    pub async fn bulk_extract(
        &self,
        set: &mut WorkingSet,
        opportunity_type: OpportunityType,
        progress: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<BatchExtractReport, BatchError> {
        let items = set
            .selected()
            .into_iter()
            .map(|candidate| ExtractRequestItem {
                title: candidate.title().unwrap_or(UNTITLED).to_string(),
                url: candidate.canonical_url(),
                opportunity_type,
            })
            .collect();
        self.extract_items(items, progress, cancel).await
    }

    /// Batch extraction over explicit items, under the same in-flight guard
    /// as the working-set actions.
    pub async fn extract_items(
        &self,
        items: Vec<ExtractRequestItem>,
        progress: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<BatchExtractReport, BatchError> {
        if items.is_empty() {
            return Err(BatchError::EmptySelection);
        }
        let _guard = self.in_flight.try_lock().map_err(|_| BatchError::Busy)?;
        Ok(self.extractor.extract_batch(items, progress, cancel).await)
    }

    pub fn bulk_delete(&self, set: &mut WorkingSet) -> Result<usize, BatchError> {
        if set.selected.is_empty() {
            return Err(BatchError::EmptySelection);
        }
        Ok(set.bulk_delete())
    }
}
