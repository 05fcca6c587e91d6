use async_trait::async_trait;
use harvest_core::ScrapeOptions;
use harvest_storage::JsonHttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::AdapterError;

/// Postings the service found on one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub items: Vec<Map<String, JsonValue>>,
    #[serde(default)]
    pub pagination_urls: Vec<String>,
    #[serde(default)]
    pub cost: Option<f64>,
}

#[async_trait]
pub trait ScrapeService: Send + Sync {
    /// Ask the service to pull `fields` for every posting found at `url`.
    async fn scrape_fields(
        &self,
        url: &str,
        fields: &[String],
        options: &ScrapeOptions,
    ) -> Result<ScrapedPage, AdapterError>;

    /// Full page text, unsummarized.
    async fn raw_content(&self, url: &str) -> Result<String, AdapterError>;
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    fields: &'a [String],
    model: &'a str,
    use_pagination: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination_details: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeMetadata {
    #[serde(default)]
    total_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<JsonValue>,
    #[serde(default)]
    jobs: Option<Vec<JsonValue>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    pagination_urls: Vec<String>,
    #[serde(default)]
    metadata: Option<ScrapeMetadata>,
}

impl ScrapeResponse {
    fn into_page(self, url: &str) -> Result<ScrapedPage, AdapterError> {
        if !self.success {
            let message = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "scrape failed".to_string());
            return Err(AdapterError::service(url, message));
        }

        // `jobs` wins over a single `data` object.
        let values = match (self.jobs, self.data) {
            (Some(jobs), _) => jobs,
            (None, Some(JsonValue::Array(items))) => items,
            (None, Some(data)) => vec![data],
            (None, None) => Vec::new(),
        };
        let items = values
            .into_iter()
            .filter_map(|value| match value {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect();

        Ok(ScrapedPage {
            items,
            pagination_urls: self.pagination_urls,
            cost: self.metadata.and_then(|m| m.total_cost),
        })
    }
}

#[derive(Debug, Serialize)]
struct RawContentRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct RawContentResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the scrape service's `/api/scrape` and `/api/raw-content`
/// endpoints.
#[derive(Debug, Clone)]
pub struct HttpScrapeService {
    http: JsonHttpClient,
    base_url: String,
}

impl HttpScrapeService {
    pub fn new(http: JsonHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl ScrapeService for HttpScrapeService {
    async fn scrape_fields(
        &self,
        url: &str,
        fields: &[String],
        options: &ScrapeOptions,
    ) -> Result<ScrapedPage, AdapterError> {
        let request = ScrapeRequest {
            url,
            fields,
            model: &options.model,
            use_pagination: options.use_pagination,
            pagination_details: options.pagination_details.as_deref(),
        };
        let response: ScrapeResponse = self
            .http
            .post_json(&self.endpoint("/api/scrape"), &request, None)
            .await?;
        let page = response.into_page(url)?;
        debug!(url, items = page.items.len(), "scrape service answered");
        Ok(page)
    }

    async fn raw_content(&self, url: &str) -> Result<String, AdapterError> {
        let response: RawContentResponse = self
            .http
            .post_json(&self.endpoint("/api/raw-content"), &RawContentRequest { url }, None)
            .await?;
        if !response.success {
            return Err(AdapterError::service(
                url,
                response.error.unwrap_or_else(|| "raw content unavailable".to_string()),
            ));
        }
        Ok(response.raw_content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: JsonValue) -> ScrapeResponse {
        serde_json::from_value(value).expect("response")
    }

    #[test]
    fn jobs_array_becomes_items_with_cost() {
        let page = response(json!({
            "success": true,
            "jobs": [{ "title": "A" }, { "title": "B" }, "noise"],
            "pagination_urls": ["https://board.example.org/?page=2"],
            "metadata": { "total_cost": 0.0031 }
        }))
        .into_page("https://board.example.org")
        .expect("page");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.pagination_urls.len(), 1);
        assert_eq!(page.cost, Some(0.0031));
    }

    #[test]
    fn single_data_object_is_one_item() {
        let page = response(json!({ "success": true, "data": { "title": "Only" } }))
            .into_page("https://board.example.org/1")
            .expect("page");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["title"], "Only");
    }

    #[test]
    fn unsuccessful_response_carries_service_message() {
        let err = response(json!({ "success": false, "error": "blocked by robots" }))
            .into_page("https://board.example.org")
            .expect_err("failure");
        assert!(err.to_string().contains("blocked by robots"));
    }

    #[test]
    fn request_omits_missing_pagination_details() {
        let fields = vec!["title".to_string()];
        let body = serde_json::to_value(ScrapeRequest {
            url: "https://board.example.org",
            fields: &fields,
            model: "gpt-4o-mini",
            use_pagination: false,
            pagination_details: None,
        })
        .expect("serialize");
        assert_eq!(
            body,
            json!({
                "url": "https://board.example.org",
                "fields": ["title"],
                "model": "gpt-4o-mini",
                "use_pagination": false
            })
        );
    }
}
