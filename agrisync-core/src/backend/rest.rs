//! HTTP client for the backend's REST table endpoints.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use super::{FetchRequest, QueryClient};
use crate::error::SyncError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Table probed by [`RestClient::ping`] unless configured otherwise.
pub const DEFAULT_PING_TABLE: &str = "profiles";

/// Query client speaking the PostgREST dialect (`/rest/v1/<table>`).
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    api_key: String,
    ping_table: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            api_key,
            ping_table: DEFAULT_PING_TABLE.to_string(),
            http,
        }
    }

    pub fn with_ping_table(mut self, table: impl Into<String>) -> Self {
        self.ping_table = table.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Builds an HTTP URL for a given path.
    fn build_http_url(&self, path: &str) -> String {
        let base_url = if self.base_url.starts_with("ws://") {
            self.base_url.replace("ws://", "http://")
        } else if self.base_url.starts_with("wss://") {
            self.base_url.replace("wss://", "https://")
        } else if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://")
        {
            format!("https://{}", self.base_url)
        } else {
            self.base_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    /// URL of a table, filtered to the row with `key`.
    fn row_url(&self, resource: &str, key: &str) -> String {
        self.build_http_url(&format!(
            "/rest/v1/{}?id=eq.{}",
            resource,
            urlencoding::encode(key)
        ))
    }

    fn fetch_url(&self, request: &FetchRequest) -> String {
        let mut url = self.build_http_url(&format!(
            "/rest/v1/{}?select=*&{}=eq.{}",
            request.resource,
            urlencoding::encode(&request.scope.column),
            urlencoding::encode(&request.scope.value)
        ));
        for filter in &request.filters {
            url.push_str(&format!(
                "&{}=eq.{}",
                urlencoding::encode(&filter.column),
                urlencoding::encode(&filter.value)
            ));
        }
        if let Some(column) = &request.order_by {
            url.push_str(&format!("&order={}.desc", urlencoding::encode(column)));
        }
        if let Some(limit) = request.limit {
            url.push_str(&format!("&limit={}", limit));
        }
        url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| SyncError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http(format!(
                "Server returned status {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(response)
    }

    async fn fetch_rows(&self, request: &FetchRequest) -> Result<Vec<Value>, SyncError> {
        let failed = |reason: String| SyncError::FetchFailed {
            resource: request.resource.clone(),
            reason,
        };

        let response = self
            .send(self.http.get(self.fetch_url(request)))
            .await
            .map_err(|e| failed(e.to_string()))?;

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| failed(e.to_string()))
    }

    /// Sends a write that returns the affected rows, and takes the first one.
    async fn write_returning(
        &self,
        builder: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<Value, SyncError> {
        let response = self
            .send(builder.header("Prefer", "return=representation"))
            .await?;
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| SyncError::Http(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| SyncError::InvalidPayload {
                resource: resource.to_string(),
                reason: "write returned no rows".to_string(),
            })
    }
}

/// A write by key that touched no rows refers to a record that is not there.
fn missing_row(err: SyncError, resource: &str, key: &str) -> SyncError {
    match err {
        SyncError::InvalidPayload { .. } => SyncError::ApplyConflict {
            resource: resource.to_string(),
            key: key.to_string(),
        },
        other => other,
    }
}

impl QueryClient for RestClient {
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<Value>, SyncError>> {
        Box::pin(self.fetch_rows(request))
    }

    fn insert<'a>(&'a self, resource: &'a str, row: Value) -> BoxFuture<'a, Result<Value, SyncError>> {
        Box::pin(async move {
            let url = self.build_http_url(&format!("/rest/v1/{}", resource));
            self.write_returning(self.http.post(url).json(&row), resource)
                .await
        })
    }

    fn update<'a>(
        &'a self,
        resource: &'a str,
        key: &'a str,
        patch: Value,
    ) -> BoxFuture<'a, Result<Value, SyncError>> {
        Box::pin(async move {
            let url = self.row_url(resource, key);
            self.write_returning(self.http.patch(url).json(&patch), resource)
                .await
                .map_err(|e| missing_row(e, resource, key))
        })
    }

    fn delete<'a>(&'a self, resource: &'a str, key: &'a str) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(async move {
            let url = self.row_url(resource, key);
            self.write_returning(self.http.delete(url), resource)
                .await
                .map(|_| ())
                .map_err(|e| missing_row(e, resource, key))
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        Box::pin(async move {
            let url = self.build_http_url(&format!("/rest/v1/{}?select=id&limit=1", self.ping_table));
            self.send(self.http.get(url)).await.map(|_| ())
        })
    }
}
