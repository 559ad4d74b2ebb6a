use crate::config::{Config, SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::extract;
use reqwest::header;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Scraper issues the run's HTTP requests and turns response bodies into raw
/// record values. One instance lives for one run.
pub struct Scraper {
    client: reqwest::Client,
    delay: Duration,
}

impl Scraper {
    /// Create a new Scraper with the given configuration.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_request))
            .connect_timeout(Duration::from_secs(config.timeout_request.min(30)))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            delay: Duration::from_secs(config.delay_between_requests),
        })
    }

    /// Fetches `url` and returns the body as text.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/html,application/json;q=0.9,*/*;q=0.8")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        Ok(response.text().await?)
    }

    /// Fetches a configured source and extracts its raw record value.
    /// A page whose payload cannot be found yields `Value::Null`.
    pub async fn fetch_source(&self, source: &SourceConfig) -> Result<Value, FetchError> {
        let body = self.fetch_text(&source.url).await?;
        Ok(extract_raw(source, &body).unwrap_or_else(|| {
            warn!("[{}] no records found in response from {}", source.name, source.url);
            Value::Null
        }))
    }

    /// Fixed pause between requests.
    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Pulls the record payload out of a response body according to the
/// source's kind, pointer and marker.
pub fn extract_raw(source: &SourceConfig, body: &str) -> Option<Value> {
    let payload = match source.kind {
        SourceKind::Json => serde_json::from_str::<Value>(body).ok()?,
        SourceKind::Embedded => match &source.marker {
            Some(marker) => extract::script_json(body, marker)
                .or_else(|| extract::embedded_json(body, marker))?,
            None => extract::next_data(body)?,
        },
    };

    match &source.pointer {
        Some(pointer) => payload.pointer(pointer).cloned(),
        None => Some(payload),
    }
}
