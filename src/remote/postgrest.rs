use super::{RemoteResult, RemoteStore};
use crate::commands::settings::RemoteSettings;
use crate::error::RemoteError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const PAGE_SIZE: usize = 1000;

/// Remote store spoken to over a PostgREST-compatible HTTP API.
#[derive(Clone)]
pub struct PostgrestStore {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

impl PostgrestStore {
    pub fn new(settings: &RemoteSettings) -> RemoteResult<Self> {
        let mut base = settings.url.trim_end_matches('/').to_string();
        base.push_str("/rest/v1/");
        let base_url = Url::parse(&base)
            .map_err(|e| RemoteError::transport(format!("invalid remote url {}: {e}", settings.url)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: settings.api_key.clone(),
        })
    }

    fn url(&self, collection: &str) -> RemoteResult<Url> {
        self.base_url
            .join(collection)
            .map_err(|e| RemoteError::transport(format!("failed to build url for {collection}: {e}")))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key).bearer_auth(&self.api_key)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> RemoteResult<(HeaderMap, String)> {
        let response = self.authed(req).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }
        Ok((headers, body))
    }

    async fn get_rows(&self, req: reqwest::RequestBuilder) -> RemoteResult<Vec<Value>> {
        let (_, body) = self.send(req).await?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::new(502, format!("malformed response body: {e}")))
    }
}

fn error_from_body(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<PostgrestErrorBody>(body) {
        Ok(parsed) => {
            let mut message = parsed.message.unwrap_or_else(|| body.to_string());
            if let Some(details) = parsed.details {
                message = format!("{message} ({details})");
            }
            let err = RemoteError::new(status, message);
            match parsed.code {
                Some(code) => err.with_code(code),
                None => err,
            }
        }
        Err(_) => RemoteError::new(status, body.to_string()),
    }
}

/// Total from a `Content-Range: 0-0/123` header; `*` totals are unknown.
fn parse_content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .and_then(|raw| raw.rsplit('/').next())
        .and_then(|total| total.parse().ok())
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn count(&self, collection: &str) -> RemoteResult<u64> {
        let url = self.url(collection)?;
        let req = self
            .http
            .get(url)
            .query(&[("select", "id"), ("limit", "1")])
            .header("Prefer", "count=exact");
        let (headers, _) = self.send(req).await?;
        parse_content_range_total(&headers)
            .ok_or_else(|| RemoteError::new(502, format!("no row count returned for {collection}")))
    }

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<Value>> {
        let url = self.url(collection)?;
        let mut rows = Vec::new();
        let mut offset = 0usize;
        loop {
            let req = self.http.get(url.clone()).query(&[
                ("select", "*".to_string()),
                ("order", "id.asc".to_string()),
                ("limit", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ]);
            let page = self.get_rows(req).await?;
            let fetched = page.len();
            rows.extend(page);
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        Ok(rows)
    }

    async fn select_where(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> RemoteResult<Vec<Value>> {
        let url = self.url(collection)?;
        let filter = format!("eq.{value}");
        let req = self
            .http
            .get(url)
            .query(&[("select", "*"), (field, filter.as_str())]);
        self.get_rows(req).await
    }

    async fn upsert(&self, collection: &str, row: &Value) -> RemoteResult<()> {
        let url = self.url(collection)?;
        let req = self
            .http
            .post(url)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);
        self.send(req).await.map(|_| ())
    }
}
