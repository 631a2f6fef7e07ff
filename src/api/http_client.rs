use crate::config::ApiConfig;
use crate::error::ChartError;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Thin JSON wrapper over one shared `reqwest::Client`.
///
/// No automatic retry: a failed ranking fetch is surfaced to the caller, who
/// decides whether to try again.
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        // The dev backend sits behind ngrok; without this it serves an HTML interstitial.
        headers.insert("ngrok-skip-browser-warning", HeaderValue::from_static("true"));

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChartError> {
        let mut url = url::Url::parse(&self.url(path))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        debug!("GET {}", url);

        let resp = self.inner.get(url.clone()).send().await?;
        Self::decode(url.to_string(), resp).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ChartError> {
        let url = self.url(path);
        debug!("POST {}", url);

        let resp = self.inner.post(&url).json(body).send().await?;
        Self::decode(url, resp).await
    }

    async fn decode<T: DeserializeOwned>(url: String, resp: reqwest::Response) -> Result<T, ChartError> {
        let status = resp.status();
        if !status.is_success() {
            warn!("{} answered {}", url, status);
            return Err(ChartError::Status { status, url });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!("{}: undecodable body ({})", url, e);
            ChartError::Decode(format!("{}: {}", url, e))
        })
    }
}
