use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_core::{normalize_source_url, ExtractedOpportunity};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{
    scraped_item_problem, BulkSaveReport, ItemFailure, ListFilter, NewScrapedOpportunity,
    OpportunityStore, Page, RecordMutation, StoreError,
};

#[derive(Debug, Clone)]
pub struct ScrapedRow {
    pub id: Uuid,
    pub item: NewScrapedOpportunity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<Uuid, ExtractedOpportunity>,
    by_url: HashMap<String, Uuid>,
    scraped: Vec<ScrapedRow>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn scraped_rows(&self) -> Vec<ScrapedRow> {
        self.tables.lock().await.scraped.clone()
    }

    pub async fn len(&self) -> usize {
        self.tables.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn insert(&self, record: ExtractedOpportunity) -> Result<ExtractedOpportunity, StoreError> {
        let key = normalize_source_url(&record.source_url);
        let mut tables = self.tables.lock().await;
        if tables.by_url.contains_key(&key) {
            return Err(StoreError::Conflict(record.source_url));
        }
        tables.by_url.insert(key, record.id);
        tables.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExtractedOpportunity>, StoreError> {
        Ok(self.tables.lock().await.records.get(&id).cloned())
    }

    async fn find_by_source_url(&self, url: &str) -> Result<Option<ExtractedOpportunity>, StoreError> {
        let key = normalize_source_url(url);
        let tables = self.tables.lock().await;
        Ok(tables
            .by_url
            .get(&key)
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    async fn list(&self, filter: ListFilter) -> Result<Page<ExtractedOpportunity>, StoreError> {
        let tables = self.tables.lock().await;
        let mut matching = tables
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();
        Ok(Page {
            items,
            total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn update_with(
        &self,
        id: Uuid,
        mutate: RecordMutation<'_>,
    ) -> Result<ExtractedOpportunity, StoreError> {
        let mut tables = self.tables.lock().await;
        let current = tables.records.get(&id).ok_or(StoreError::NotFound(id))?;
        // Mutate a copy so a rejected change leaves the row untouched.
        let mut next = current.clone();
        mutate(&mut next)?;
        next.updated_at = Utc::now();
        tables.records.insert(id, next.clone());
        Ok(next)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.records.remove(&id) {
            Some(removed) => {
                tables.by_url.remove(&normalize_source_url(&removed.source_url));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_scraped(&self, batch: Vec<NewScrapedOpportunity>) -> Result<BulkSaveReport, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut report = BulkSaveReport {
            total: batch.len(),
            ..Default::default()
        };
        let now = Utc::now();
        for item in batch {
            if let Some(problem) = scraped_item_problem(&item) {
                report.errors.push(ItemFailure {
                    title: item.title,
                    url: item.source_url,
                    error: problem,
                });
                continue;
            }
            let id = Uuid::new_v4();
            tables.scraped.push(ScrapedRow {
                id,
                item,
                created_at: now,
            });
            report.saved_ids.push(id);
            report.saved += 1;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{CleanedContent, ExtractionStatus, OpportunityType, PolishSource, Section, Sections};
    use serde_json::Map;

    fn pending(url: &str) -> ExtractedOpportunity {
        ExtractedOpportunity::pending("Field Officer", url, OpportunityType::Job, Utc::now())
    }

    #[tokio::test]
    async fn duplicate_normalized_url_conflicts() {
        let store = MemoryStore::new();
        store
            .insert(pending("https://Jobs.example.org/p/1/"))
            .await
            .expect("first insert");
        let err = store
            .insert(pending("https://jobs.example.org/p/1#top"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store
            .find_by_source_url("https://jobs.example.org/p/1")
            .await
            .expect("lookup");
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn rejected_transition_leaves_row_untouched() {
        let store = MemoryStore::new();
        let rec = store.insert(pending("https://jobs.example.org/p/2")).await.expect("insert");
        let err = store
            .advance_status(rec.id, ExtractionStatus::Completed)
            .await
            .expect_err("pending -> completed");
        assert!(matches!(err, StoreError::Transition(_)));
        let stored = store.get(rec.id).await.expect("get").expect("present");
        assert_eq!(stored.extraction_status, ExtractionStatus::Pending);
        assert_eq!(stored.updated_at, rec.updated_at);
    }

    #[tokio::test]
    async fn commit_polish_rejects_second_commit() {
        let store = MemoryStore::new();
        let rec = store.insert(pending("https://jobs.example.org/p/3")).await.expect("insert");
        let cleaned = CleanedContent::new(Sections::default().with(Section::Overview, "Role"));
        store
            .commit_polish(rec.id, &cleaned, PolishSource::RuleBased, Utc::now())
            .await
            .expect("commit");
        let err = store
            .commit_polish(rec.id, &cleaned, PolishSource::RuleBased, Utc::now())
            .await
            .expect_err("already polished");
        assert!(matches!(err, StoreError::AlreadyPolished(id) if id == rec.id));
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut rec = pending(&format!("https://jobs.example.org/p/{i}"));
            if i % 2 == 0 {
                rec.opportunity_type = OpportunityType::Funding;
            }
            store.insert(rec).await.expect("insert");
        }
        let page = store
            .list(ListFilter {
                opportunity_type: Some(OpportunityType::Funding),
                limit: 2,
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn save_scraped_reports_item_errors() {
        let store = MemoryStore::new();
        let ok = NewScrapedOpportunity {
            title: "Grant call".into(),
            opportunity_type: OpportunityType::Funding,
            source_url: "https://grants.example.org/1".into(),
            details: Map::new(),
        };
        let bad = NewScrapedOpportunity {
            source_url: "grants.example.org/2".into(),
            ..ok.clone()
        };
        let report = store.save_scraped(vec![ok, bad]).await.expect("save");
        assert_eq!((report.saved, report.total), (1, 2));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(store.scraped_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn delete_frees_the_source_url() {
        let store = MemoryStore::new();
        let rec = store.insert(pending("https://jobs.example.org/p/9")).await.expect("insert");
        assert!(store.delete(rec.id).await.expect("delete"));
        assert!(!store.delete(rec.id).await.expect("second delete"));
        store.insert(pending("https://jobs.example.org/p/9")).await.expect("reinsert");
    }
}
