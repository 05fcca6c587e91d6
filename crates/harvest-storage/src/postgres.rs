//! Postgres-backed store. Queries are checked at runtime so the crate builds
//! without a live database.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use harvest_core::{normalize_source_url, ExtractedOpportunity, PolishSource, PolishState};
use serde_json::Value as JsonValue;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{
    scraped_item_problem, BulkSaveReport, ItemFailure, ListFilter, NewScrapedOpportunity,
    OpportunityStore, Page, RecordMutation, StoreError,
};

const COLUMNS: &str = r#"
    id, title, opportunity_type, source_url, company, location, salary_range, job_type,
    deadline, description, responsibilities, requirements, qualifications, benefits,
    application_instructions, contact_info, additional_info, raw_content, structured_content,
    extraction_status, extraction_error, extracted_at, model_used, extraction_cost,
    content_polished_at, polished_by, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply every pending migration found under `dir`.
    pub async fn migrate(&self, dir: &Path) -> anyhow::Result<()> {
        let migrator = Migrator::new(dir)
            .await
            .with_context(|| format!("loading migrations from {}", dir.display()))?;
        migrator.run(&self.pool).await.context("running migrations")?;
        info!(dir = %dir.display(), "migrations applied");
        Ok(())
    }
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{column}: {err}"))
}

fn row_to_opportunity(row: &PgRow) -> Result<ExtractedOpportunity, StoreError> {
    let opportunity_type: String = row.try_get("opportunity_type")?;
    let status: String = row.try_get("extraction_status")?;
    let structured: Option<JsonValue> = row.try_get("structured_content")?;
    let structured_content = match structured {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::Object(map)) => Some(map),
        Some(other) => return Err(corrupt("structured_content", format!("not an object: {other}"))),
    };
    let polished_at: Option<DateTime<Utc>> = row.try_get("content_polished_at")?;
    let polished_by: Option<String> = row.try_get("polished_by")?;

    Ok(ExtractedOpportunity {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        opportunity_type: opportunity_type
            .parse()
            .map_err(|err| corrupt("opportunity_type", err))?,
        source_url: row.try_get("source_url")?,
        company: row.try_get("company")?,
        location: row.try_get("location")?,
        salary_range: row.try_get("salary_range")?,
        job_type: row.try_get("job_type")?,
        deadline: row.try_get::<Option<NaiveDate>, _>("deadline")?,
        description: row.try_get("description")?,
        responsibilities: row.try_get("responsibilities")?,
        requirements: row.try_get("requirements")?,
        qualifications: row.try_get("qualifications")?,
        benefits: row.try_get("benefits")?,
        application_instructions: row.try_get("application_instructions")?,
        contact_info: row.try_get("contact_info")?,
        additional_info: row.try_get("additional_info")?,
        raw_content: row.try_get("raw_content")?,
        structured_content,
        extraction_status: status.parse().map_err(|err| corrupt("extraction_status", err))?,
        extraction_error: row.try_get("extraction_error")?,
        extracted_at: row.try_get("extracted_at")?,
        model_used: row.try_get("model_used")?,
        extraction_cost: row.try_get("extraction_cost")?,
        polish: PolishState::from_columns(polished_at, polished_by.as_deref()),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn structured_json(record: &ExtractedOpportunity) -> Option<JsonValue> {
    record.structured_content.clone().map(JsonValue::Object)
}

#[async_trait]
impl OpportunityStore for PgStore {
    async fn insert(&self, record: ExtractedOpportunity) -> Result<ExtractedOpportunity, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO extracted_opportunity_content (
                id, title, opportunity_type, source_url, source_url_key, company, location,
                salary_range, job_type, deadline, description, responsibilities, requirements,
                qualifications, benefits, application_instructions, contact_info, additional_info,
                raw_content, structured_content, extraction_status, extraction_error, extracted_at,
                model_used, extraction_cost, content_polished_at, polished_by, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
            )
            ON CONFLICT (source_url_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(&record.title)
        .bind(record.opportunity_type.as_str())
        .bind(&record.source_url)
        .bind(normalize_source_url(&record.source_url))
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.salary_range)
        .bind(&record.job_type)
        .bind(record.deadline)
        .bind(&record.description)
        .bind(&record.responsibilities)
        .bind(&record.requirements)
        .bind(&record.qualifications)
        .bind(&record.benefits)
        .bind(&record.application_instructions)
        .bind(&record.contact_info)
        .bind(&record.additional_info)
        .bind(&record.raw_content)
        .bind(structured_json(&record))
        .bind(record.extraction_status.as_str())
        .bind(&record.extraction_error)
        .bind(record.extracted_at)
        .bind(&record.model_used)
        .bind(record.extraction_cost)
        .bind(record.polish.polished_at())
        .bind(record.polish.polished_by().map(PolishSource::to_column))
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(_) => Ok(record),
            None => Err(StoreError::Conflict(record.source_url)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExtractedOpportunity>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM extracted_opportunity_content WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_opportunity).transpose()
    }

    async fn find_by_source_url(&self, url: &str) -> Result<Option<ExtractedOpportunity>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM extracted_opportunity_content WHERE source_url_key = $1"
        );
        let row = sqlx::query(&sql)
            .bind(normalize_source_url(url))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_opportunity).transpose()
    }

    async fn list(&self, filter: ListFilter) -> Result<Page<ExtractedOpportunity>, StoreError> {
        fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ListFilter) {
            qb.push(" WHERE TRUE");
            if let Some(kind) = filter.opportunity_type {
                qb.push(" AND opportunity_type = ").push_bind(kind.as_str());
            }
            if let Some(status) = filter.status {
                qb.push(" AND extraction_status = ").push_bind(status.as_str());
            }
        }

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM extracted_opportunity_content");
        push_filters(&mut count, &filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {COLUMNS} FROM extracted_opportunity_content"
        ));
        push_filters(&mut select, &filter);
        select
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);
        let rows = select.build().fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(row_to_opportunity)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn update_with(
        &self,
        id: Uuid,
        mutate: RecordMutation<'_>,
    ) -> Result<ExtractedOpportunity, StoreError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {COLUMNS} FROM extracted_opportunity_content WHERE id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let mut record = row_to_opportunity(&row)?;
        mutate(&mut record)?;
        record.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE extracted_opportunity_content
               SET title = $2, company = $3, location = $4, salary_range = $5, job_type = $6,
                   deadline = $7, description = $8, responsibilities = $9, requirements = $10,
                   qualifications = $11, benefits = $12, application_instructions = $13,
                   contact_info = $14, additional_info = $15, raw_content = $16,
                   structured_content = $17, extraction_status = $18, extraction_error = $19,
                   extracted_at = $20, model_used = $21, extraction_cost = $22,
                   content_polished_at = $23, polished_by = $24, updated_at = $25
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.salary_range)
        .bind(&record.job_type)
        .bind(record.deadline)
        .bind(&record.description)
        .bind(&record.responsibilities)
        .bind(&record.requirements)
        .bind(&record.qualifications)
        .bind(&record.benefits)
        .bind(&record.application_instructions)
        .bind(&record.contact_info)
        .bind(&record.additional_info)
        .bind(&record.raw_content)
        .bind(structured_json(&record))
        .bind(record.extraction_status.as_str())
        .bind(&record.extraction_error)
        .bind(record.extracted_at)
        .bind(&record.model_used)
        .bind(record.extraction_cost)
        .bind(record.polish.polished_at())
        .bind(record.polish.polished_by().map(PolishSource::to_column))
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%id, status = %record.extraction_status, "opportunity updated");
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM extracted_opportunity_content WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_scraped(&self, batch: Vec<NewScrapedOpportunity>) -> Result<BulkSaveReport, StoreError> {
        let mut report = BulkSaveReport {
            total: batch.len(),
            ..Default::default()
        };
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
            let result = sqlx::query(
                r#"
                INSERT INTO scraped_opportunities (id, title, opportunity_type, source_url, details, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                "#,
            )
            .bind(id)
            .bind(&item.title)
            .bind(item.opportunity_type.as_str())
            .bind(&item.source_url)
            .bind(JsonValue::Object(item.details.clone()))
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    report.saved += 1;
                    report.saved_ids.push(id);
                }
                Err(err) => report.errors.push(ItemFailure {
                    title: item.title,
                    url: item.source_url,
                    error: err.to_string(),
                }),
            }
        }
        Ok(report)
    }
}
