//! JSON API over the harvest pipeline.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use harvest_core::{
    CandidateId, CandidateRecord, CleanedContent, OpportunityType, PolishSource, ScrapeOptions,
    ScrapeOutcome,
};
use harvest_pipeline::{
    BatchError, CancelFlag, ExtractRequestItem, Harvest, HarvestConfig, NullProgress,
    ResolveError, ValidationError, WorkingSet,
};
use harvest_storage::{FieldPatch, ListFilter, StoreError};
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "harvest-web";

#[derive(Clone)]
pub struct AppState {
    pub harvest: Harvest,
}

impl AppState {
    pub fn new(harvest: Harvest) -> Self {
        Self { harvest }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/extract-opportunity",
            post(extract_handler).get(list_handler),
        )
        .route(
            "/api/extract-opportunity/{id}",
            get(get_handler).patch(patch_handler).delete(delete_handler),
        )
        .route(
            "/api/extract-opportunity/{id}/content",
            get(content_handler).post(commit_handler),
        )
        .route("/api/extract-opportunity/{id}/polish", post(polish_handler))
        .route("/api/scrape", post(scrape_handler))
        .route("/api/scraped-opportunities/bulk", post(bulk_save_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(harvest: Harvest, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "harvest api listening");
    axum::serve(listener, app(AppState::new(harvest))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = HarvestConfig::from_env();
    let harvest = Harvest::from_config(&config).await?;
    serve(harvest, config.web_port).await
}

/// Error body shared by every handler: `{"error": "..."}` with a status.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "Opportunity not found".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound(_) => return Self::not_found(),
            StoreError::Conflict(_) | StoreError::AlreadyPolished(_) | StoreError::Transition(_) => {
                StatusCode::CONFLICT
            }
            StoreError::Corrupt(_) | StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => Self::not_found(),
            ResolveError::AlreadyPolished(_) => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
            ResolveError::Store(store) => store.into(),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::EmptySelection => Self::bad_request("Opportunities array is required"),
            BatchError::Busy => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
            BatchError::Store(store) => store.into(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.to_string())
    }
}

type ApiResult = Result<Json<JsonValue>, ApiError>;

#[derive(Debug, Deserialize)]
struct ExtractBody {
    #[serde(default)]
    opportunities: Vec<ExtractRequestItem>,
}

async fn extract_handler(State(state): State<Arc<AppState>>, Json(body): Json<ExtractBody>) -> ApiResult {
    let report = state
        .harvest
        .batch
        .extract_items(body.opportunities, &mut NullProgress, &CancelFlag::new())
        .await?;
    let mut out = json!({ "success": true });
    if let (JsonValue::Object(out), Ok(JsonValue::Object(report))) =
        (&mut out, serde_json::to_value(&report))
    {
        out.extend(report);
    }
    Ok(Json(out))
}

/// Unknown `type`/`status` values are ignored rather than rejected.
#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    #[serde(rename = "type")]
    opportunity_type: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl ListQuery {
    fn filter(&self) -> ListFilter {
        let defaults = ListFilter::default();
        ListFilter {
            opportunity_type: self.opportunity_type.as_deref().and_then(|t| t.parse().ok()),
            status: self.status.as_deref().and_then(|s| s.parse().ok()),
            limit: self.limit.unwrap_or(defaults.limit).max(1),
            offset: self.offset.unwrap_or(defaults.offset),
        }
    }
}

async fn list_handler(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> ApiResult {
    let page = state.harvest.store.list(query.filter()).await?;
    Ok(Json(json!({
        "success": true,
        "data": page.items,
        "total": page.total,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

async fn get_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult {
    let record = state
        .harvest
        .store
        .get(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn patch_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<FieldPatch>,
) -> ApiResult {
    if patch.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }
    let record = state.harvest.store.update_fields(id, &patch).await?;
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn delete_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult {
    if !state.harvest.store.delete(id).await? {
        return Err(ApiError::not_found());
    }
    info!(%id, "opportunity deleted");
    Ok(Json(json!({
        "success": true,
        "message": "Opportunity deleted successfully",
    })))
}

async fn content_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult {
    let (record, content) = state.harvest.resolver.resolve_by_id(id).await?;
    Ok(Json(json!({
        "success": true,
        "data": content,
        "polished": record.polish.is_polished(),
    })))
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    content: CleanedContent,
    /// Model that produced `content`; absent means a rule-based or manual edit.
    #[serde(default)]
    model: Option<String>,
}

async fn commit_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CommitBody>,
) -> ApiResult {
    let by = body.model.map_or(PolishSource::RuleBased, PolishSource::Model);
    let record = state.harvest.resolver.commit(id, &body.content, by).await?;
    Ok(Json(json!({ "success": true, "data": record })))
}

async fn polish_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult {
    let outcome = state.harvest.resolver.polish(id).await?;
    Ok(Json(json!({
        "success": true,
        "data": outcome.record,
        "content": outcome.content,
        "newly_polished": outcome.newly_polished,
    })))
}

#[derive(Debug, Deserialize)]
struct ScrapeBody {
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    fields: Vec<String>,
    model: Option<String>,
    #[serde(default)]
    use_pagination: bool,
    pagination_details: Option<String>,
}

async fn scrape_handler(State(state): State<Arc<AppState>>, Json(body): Json<ScrapeBody>) -> ApiResult {
    let mut options = ScrapeOptions::default();
    if let Some(model) = body.model.filter(|m| !m.trim().is_empty()) {
        options.model = model;
    }
    options.use_pagination = body.use_pagination;
    options.pagination_details = body.pagination_details;

    let outcomes = state
        .harvest
        .orchestrator
        .scrape_all(&body.urls, &body.fields, &options, &CancelFlag::new())
        .await?;
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    Ok(Json(json!({
        "success": true,
        "succeeded": succeeded,
        "failed": outcomes.len() - succeeded,
        "results": outcomes,
    })))
}

#[derive(Debug, Deserialize)]
struct BulkSaveBody {
    #[serde(default)]
    opportunities: Vec<Map<String, JsonValue>>,
    opportunity_type: Option<OpportunityType>,
    #[serde(default)]
    source_url: String,
}

/// Posted items become a one-page working set with everything selected.
fn selected_working_set(source_url: &str, items: Vec<Map<String, JsonValue>>) -> WorkingSet {
    let candidates = items
        .into_iter()
        .enumerate()
        .map(|(item, fields)| CandidateRecord::new(CandidateId::new(0, item), source_url, fields))
        .collect();
    let mut set = WorkingSet::new(vec![ScrapeOutcome::Success {
        url: source_url.to_string(),
        candidates,
        pagination_urls: vec![],
        cost: None,
    }]);
    set.select_all();
    set
}

async fn bulk_save_handler(State(state): State<Arc<AppState>>, Json(body): Json<BulkSaveBody>) -> ApiResult {
    let Some(opportunity_type) = body.opportunity_type else {
        return Err(ApiError::bad_request(
            "Valid opportunity_type is required (job, funding, training)",
        ));
    };
    let source_url = body.source_url.trim();
    if source_url.is_empty() {
        return Err(ApiError::bad_request("Source URL is required"));
    }

    let mut set = selected_working_set(source_url, body.opportunities);
    let report = state
        .harvest
        .batch
        .bulk_save(&mut set, opportunity_type)
        .await?;
    Ok(Json(json!({
        "success": true,
        "saved": report.saved,
        "total": report.total,
        "saved_ids": report.saved_ids,
        "errors": report.errors,
    })))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use harvest_adapters::FixtureScrapeService;
    use harvest_core::ExtractionStatus;
    use harvest_pipeline::SectionExtractor;
    use harvest_storage::{MemoryStore, OpportunityStore};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const LISTING: &str = "https://careers.relief.example.org/jobs";
    const DETAIL: &str = "https://careers.relief.example.org/jobs/programme-officer-nutrition";
    const BROKEN: &str = "https://careers.relief.example.org/jobs/finance-assistant";

    fn workspace_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    fn harvest() -> (Harvest, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let scraper = FixtureScrapeService::load(workspace_root().join("fixtures/scrape/relief-board.json"))
            .unwrap();
        let harvest = Harvest::assemble(
            store.clone(),
            Arc::new(scraper),
            SectionExtractor::rule_based(),
            true,
        );
        (harvest, store)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn extract_then_list_and_fetch() {
        let (harvest, _store) = harvest();
        let app = app(AppState::new(harvest));

        let (status, body) = call(
            &app,
            "POST",
            "/api/extract-opportunity",
            Some(json!({ "opportunities": [
                { "title": "Programme Officer, Nutrition", "url": DETAIL, "opportunity_type": "job" },
                { "title": "Finance Assistant", "url": BROKEN, "opportunity_type": "job" }
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["extracted"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["total"], 2);

        let (status, list) = call(&app, "GET", "/api/extract-opportunity?type=job&status=completed", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
        let record = &list["data"][0];
        assert_eq!(record["company"], "Relief Example");
        assert_eq!(record["deadline"], "2026-04-15");

        let id = record["id"].as_str().unwrap();
        let (status, one) = call(&app, "GET", &format!("/api/extract-opportunity/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(one["data"]["source_url"], DETAIL);
    }

    #[tokio::test]
    async fn empty_extract_request_is_rejected() {
        let (harvest, store) = harvest();
        let app = app(AppState::new(harvest));
        let (status, body) = call(&app, "POST", "/api/extract-opportunity", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Opportunities array is required");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn polish_is_idempotent_over_http() {
        let (harvest, store) = harvest();
        let mut record = harvest_core::ExtractedOpportunity::pending(
            "Driver",
            "https://careers.relief.example.org/jobs/driver",
            OpportunityType::Job,
            chrono::Utc::now(),
        );
        record.description = Some("We use cookies to improve your experience.\nDrive the field team.".into());
        let record = store.insert(record).await.unwrap();
        let app = app(AppState::new(harvest));

        let (status, content) = call(&app, "GET", &format!("/api/extract-opportunity/{}/content", record.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content["polished"], false);
        assert_eq!(content["data"]["combinedPlainText"], "Drive the field team.");

        let uri = format!("/api/extract-opportunity/{}/polish", record.id);
        let (status, first) = call(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["newly_polished"], true);
        let (_, second) = call(&app, "POST", &uri, None).await;
        assert_eq!(second["newly_polished"], false);
        assert_eq!(second["data"]["updated_at"], first["data"]["updated_at"]);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/extract-opportunity/{}/content", record.id),
            Some(json!({ "content": { "overview": "Edited" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn patch_and_delete_records() {
        let (harvest, store) = harvest();
        let record = store
            .insert(harvest_core::ExtractedOpportunity::pending(
                "Driver",
                "https://careers.relief.example.org/jobs/driver",
                OpportunityType::Job,
                chrono::Utc::now(),
            ))
            .await
            .unwrap();
        let app = app(AppState::new(harvest));
        let uri = format!("/api/extract-opportunity/{}", record.id);

        let (status, patched) = call(&app, "PATCH", &uri, Some(json!({ "location": "Agadir", "company": null }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["data"]["location"], "Agadir");

        let (status, _) = call(&app, "PATCH", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Opportunity not found");
        assert_eq!(
            store.get(record.id).await.unwrap().map(|r| r.extraction_status),
            None::<ExtractionStatus>
        );
    }

    #[tokio::test]
    async fn scrape_reports_one_outcome_per_url() {
        let (harvest, _store) = harvest();
        let app = app(AppState::new(harvest));
        let (status, body) = call(
            &app,
            "POST",
            "/api/scrape",
            Some(json!({ "urls": [LISTING, BROKEN], "fields": ["title", "url", "link"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["succeeded"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);

        let (status, _) = call(&app, "POST", "/api/scrape", Some(json!({ "urls": [LISTING] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bulk_save_resolves_each_posting_link() {
        let (harvest, store) = harvest();
        let app = app(AppState::new(harvest));
        let (status, body) = call(
            &app,
            "POST",
            "/api/scraped-opportunities/bulk",
            Some(json!({
                "opportunity_type": "job",
                "source_url": LISTING,
                "opportunities": [
                    { "title": "Programme Officer, Nutrition", "url": "/jobs/programme-officer-nutrition" },
                    { "company": "Relief Example" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["saved"], 2);

        let rows = store.scraped_rows().await;
        assert_eq!(rows[0].item.source_url, DETAIL);
        assert_eq!(rows[1].item.source_url, LISTING);
        assert_eq!(rows[1].item.title, "Untitled Opportunity");

        let (status, _) = call(
            &app,
            "POST",
            "/api/scraped-opportunities/bulk",
            Some(json!({ "source_url": LISTING, "opportunities": [{ "title": "x" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
