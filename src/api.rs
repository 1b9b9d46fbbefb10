use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::config::BackendConfig;
use crate::model::{
    CrawlJob, Crawler, FilterSet, InheritableFields, Rule, RuleMatches, SourceItem,
    UnmatchedSummary,
};

pub const CSRF_HEADER: &str = "X-CSRFToken";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("backend request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("decode backend response: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewCrawler {
    pub name: String,
    pub source_item: String,
    pub start_url: String,
}

/// Partial update; only present fields are sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRule {
    pub filter_set: i64,
    pub rule: String,
    pub include: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RulePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

/// The backend REST surface the console consumes. The HTTP implementation is
/// the production one; controllers only see this trait.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_crawlers(&self) -> Result<Vec<Crawler>, ApiError>;
    async fn create_crawler(&self, new: &NewCrawler) -> Result<Crawler, ApiError>;
    async fn update_crawler(&self, id: i64, patch: &CrawlerPatch) -> Result<Crawler, ApiError>;
    async fn delete_crawler(&self, id: i64) -> Result<(), ApiError>;

    async fn start_crawl(&self, id: i64) -> Result<CrawlJob, ApiError>;
    async fn start_content_crawl(&self, id: i64) -> Result<CrawlJob, ApiError>;
    async fn cancel_crawl_job(&self, id: i64) -> Result<(), ApiError>;
    async fn delete_crawl_job(&self, id: i64) -> Result<(), ApiError>;

    async fn list_source_items(&self) -> Result<Vec<SourceItem>, ApiError>;
    async fn get_source_item(&self, guid: &str) -> Result<SourceItem, ApiError>;
    async fn inheritable_fields(&self, guid: &str) -> Result<InheritableFields, ApiError>;

    async fn get_filter_set(&self, id: i64) -> Result<FilterSet, ApiError>;
    async fn unmatched(
        &self,
        filter_set_id: i64,
        crawl_job_id: i64,
    ) -> Result<UnmatchedSummary, ApiError>;

    async fn create_rule(&self, new: &NewRule) -> Result<Rule, ApiError>;
    async fn update_rule(&self, id: i64, patch: &RulePatch) -> Result<Rule, ApiError>;
    async fn delete_rule(&self, id: i64) -> Result<(), ApiError>;
    async fn rule_matches(
        &self,
        rule_id: i64,
        crawl_job_id: i64,
    ) -> Result<RuleMatches, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    csrf_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("build backend http client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            csrf_token: config.csrf_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn with_csrf(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.csrf_token {
            Some(token) => req.header(CSRF_HEADER, token),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.client.get(self.endpoint(path)).send().await?;
        read_json(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let req = self.with_csrf(self.client.post(self.endpoint(path))).json(body);
        read_json(req.send().await?).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let req = self.with_csrf(self.client.post(self.endpoint(path)));
        read_json(req.send().await?).await
    }

    async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let req = self.with_csrf(self.client.patch(self.endpoint(path))).json(body);
        read_json(req.send().await?).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let req = self.with_csrf(self.client.delete(self.endpoint(path)));
        read_empty(req.send().await?).await
    }

    async fn post_no_content(&self, path: &str) -> Result<(), ApiError> {
        let req = self.with_csrf(self.client.post(self.endpoint(path)));
        read_empty(req.send().await?).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let raw = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Http { status, body: raw });
    }
    serde_json::from_str(&raw).map_err(ApiError::Decode)
}

async fn read_empty(response: reqwest::Response) -> Result<(), ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Http { status, body });
    }
    Ok(())
}

/// URL of a crawler's SSE status stream, also consumed outside `HttpBackend`
/// by the status watcher.
pub fn status_stream_url(base_url: &str, crawler_id: i64) -> String {
    format!(
        "{}/crawlers/{crawler_id}/status_stream/",
        base_url.trim_end_matches('/')
    )
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_crawlers(&self) -> Result<Vec<Crawler>, ApiError> {
        self.get_json("/crawlers/").await
    }

    async fn create_crawler(&self, new: &NewCrawler) -> Result<Crawler, ApiError> {
        self.post_json("/crawlers/", new).await
    }

    async fn update_crawler(&self, id: i64, patch: &CrawlerPatch) -> Result<Crawler, ApiError> {
        self.patch_json(&format!("/crawlers/{id}/"), patch).await
    }

    async fn delete_crawler(&self, id: i64) -> Result<(), ApiError> {
        self.delete(&format!("/crawlers/{id}/")).await
    }

    async fn start_crawl(&self, id: i64) -> Result<CrawlJob, ApiError> {
        self.post_empty(&format!("/crawlers/{id}/start_crawl/")).await
    }

    async fn start_content_crawl(&self, id: i64) -> Result<CrawlJob, ApiError> {
        self.post_empty(&format!("/crawlers/{id}/start_content_crawl/"))
            .await
    }

    async fn cancel_crawl_job(&self, id: i64) -> Result<(), ApiError> {
        self.post_no_content(&format!("/crawl_jobs/{id}/cancel/")).await
    }

    async fn delete_crawl_job(&self, id: i64) -> Result<(), ApiError> {
        self.delete(&format!("/crawl_jobs/{id}/")).await
    }

    async fn list_source_items(&self) -> Result<Vec<SourceItem>, ApiError> {
        self.get_json("/source_items/").await
    }

    async fn get_source_item(&self, guid: &str) -> Result<SourceItem, ApiError> {
        self.get_json(&format!("/source_items/{guid}/")).await
    }

    async fn inheritable_fields(&self, guid: &str) -> Result<InheritableFields, ApiError> {
        self.get_json(&format!("/source_items/{guid}/inheritable_fields"))
            .await
    }

    async fn get_filter_set(&self, id: i64) -> Result<FilterSet, ApiError> {
        self.get_json(&format!("/filter_sets/{id}/")).await
    }

    async fn unmatched(
        &self,
        filter_set_id: i64,
        crawl_job_id: i64,
    ) -> Result<UnmatchedSummary, ApiError> {
        self.get_json(&format!(
            "/filter_sets/{filter_set_id}/unmatched/?crawl_job={crawl_job_id}"
        ))
        .await
    }

    async fn create_rule(&self, new: &NewRule) -> Result<Rule, ApiError> {
        self.post_json("/filter_rules/", new).await
    }

    async fn update_rule(&self, id: i64, patch: &RulePatch) -> Result<Rule, ApiError> {
        self.patch_json(&format!("/filter_rules/{id}/"), patch).await
    }

    async fn delete_rule(&self, id: i64) -> Result<(), ApiError> {
        self.delete(&format!("/filter_rules/{id}/")).await
    }

    async fn rule_matches(
        &self,
        rule_id: i64,
        crawl_job_id: i64,
    ) -> Result<RuleMatches, ApiError> {
        self.get_json(&format!(
            "/filter_rules/{rule_id}/matches/?crawl_job={crawl_job_id}"
        ))
        .await
    }
}
