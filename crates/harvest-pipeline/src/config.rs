use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use harvest_adapters::{model::DEFAULT_BASE_URL, HttpScrapeService, OpenAiChatModel, ScrapeService, TextModel};
use harvest_storage::{HttpClientConfig, JsonHttpClient, MemoryStore, OpportunityStore, PgStore};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    /// Postgres URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub scraper_url: String,
    /// Without a key only the rule-based extractor runs.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub web_port: u16,
    pub polish_on_extract: bool,
    pub workspace_root: PathBuf,
}

fn truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            database_url: non_blank("DATABASE_URL"),
            scraper_url: non_blank("SCRAPER_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            openai_api_key: non_blank("OPENAI_API_KEY"),
            openai_model: non_blank("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            openai_base_url: non_blank("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http_timeout_secs: non_blank("HARVEST_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(60),
            user_agent: non_blank("HARVEST_USER_AGENT")
                .unwrap_or_else(|| format!("opportunity-harvest/{}", env!("CARGO_PKG_VERSION"))),
            web_port: non_blank("HARVEST_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(8080),
            polish_on_extract: non_blank("HARVEST_POLISH_ON_EXTRACT")
                .map(|v| truthy(&v))
                .unwrap_or(true),
            workspace_root: non_blank("HARVEST_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn build_http_client(&self) -> Result<JsonHttpClient> {
        JsonHttpClient::new(self.http_client_config())
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.workspace_root.join("migrations")
    }

    pub fn scrape_service(&self, http: &JsonHttpClient) -> Arc<dyn ScrapeService> {
        Arc::new(HttpScrapeService::new(http.clone(), &self.scraper_url))
    }

    pub fn text_model(&self, http: &JsonHttpClient) -> Option<Arc<dyn TextModel>> {
        let Some(key) = &self.openai_api_key else {
            warn!("OPENAI_API_KEY not set; sections are cleaned with rules only");
            return None;
        };
        Some(Arc::new(OpenAiChatModel::new(
            http.clone(),
            &self.openai_base_url,
            key,
            &self.openai_model,
        )))
    }

    pub async fn open_store(&self) -> Result<Arc<dyn OpportunityStore>> {
        match &self.database_url {
            Some(url) => {
                let store = PgStore::connect(url).await.context("opening opportunity store")?;
                info!("using postgres opportunity store");
                Ok(Arc::new(store))
            }
            None => {
                warn!("DATABASE_URL not set; records are kept in memory only");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> HarvestConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HarvestConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let cfg = config(&[("OPENAI_API_KEY", "  "), ("HARVEST_WEB_PORT", "not-a-port")]);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.scraper_url, "http://localhost:8000");
        assert_eq!(cfg.openai_api_key, None);
        assert_eq!(cfg.openai_model, "gpt-4o-mini");
        assert_eq!(cfg.http_timeout_secs, 60);
        assert_eq!(cfg.web_port, 8080);
        assert!(cfg.polish_on_extract);
        assert_eq!(cfg.migrations_dir(), PathBuf::from("./migrations"));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = config(&[
            ("SCRAPER_URL", "http://scraper.internal:9000"),
            ("HARVEST_HTTP_TIMEOUT_SECS", "15"),
            ("HARVEST_POLISH_ON_EXTRACT", "false"),
            ("HARVEST_WORKSPACE_ROOT", "/srv/harvest"),
        ]);
        assert_eq!(cfg.scraper_url, "http://scraper.internal:9000");
        assert_eq!(cfg.http_client_config().timeout, Duration::from_secs(15));
        assert!(!cfg.polish_on_extract);
        assert_eq!(cfg.sources_path(), PathBuf::from("/srv/harvest/sources.yaml"));
    }

    #[test]
    fn no_key_means_no_model() {
        let cfg = config(&[]);
        let http = cfg.build_http_client().expect("client");
        assert!(cfg.text_model(&http).is_none());
        let cfg = config(&[("OPENAI_API_KEY", "sk-test")]);
        assert_eq!(cfg.text_model(&http).map(|m| m.model_id().to_string()).as_deref(), Some("gpt-4o-mini"));
    }
}
