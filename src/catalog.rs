use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::watch;
use url::Url;

use crate::library::UserRecord;
use crate::models::AudioQuality;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("no API instances configured")]
    NoInstances,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lookup returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("response did not contain a stream URL")]
    MissingStreamUrl,
}

/// Remote catalog lookups the core depends on.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Produces a time-limited stream URL for `track_id` at `quality`.
    async fn resolve_stream_url(
        &self,
        track_id: u64,
        quality: AudioQuality,
    ) -> Result<Url, CatalogError>;
}

/// Catalog client that walks the configured API instances in order, starting
/// with the user's preferred instance.
pub struct HttpCatalog {
    client: Client,
    instances: Vec<String>,
    preferences: Option<watch::Receiver<Arc<UserRecord>>>,
}

impl HttpCatalog {
    pub fn new(client: Client, instances: Vec<String>) -> Self {
        Self {
            client,
            instances,
            preferences: None,
        }
    }

    /// Reads `settings.apiInstance` from the library snapshot on every lookup.
    pub fn with_preferences(mut self, snapshots: watch::Receiver<Arc<UserRecord>>) -> Self {
        self.preferences = Some(snapshots);
        self
    }

    fn candidate_instances(&self) -> Vec<String> {
        let preferred = self.preferences.as_ref().and_then(|snapshots| {
            snapshots
                .borrow()
                .settings
                .api_instance
                .clone()
                .filter(|value| !value.trim().is_empty())
        });

        let mut candidates: Vec<String> = preferred.into_iter().collect();
        for instance in &self.instances {
            if !candidates.iter().any(|existing| same_instance(existing, instance)) {
                candidates.push(instance.clone());
            }
        }
        candidates
    }

    async fn lookup(
        &self,
        instance: &str,
        track_id: u64,
        quality: &AudioQuality,
    ) -> Result<Url, CatalogError> {
        let endpoint = track_endpoint(instance)?;
        let response = self
            .client
            .get(endpoint)
            .query(&[
                ("id", track_id.to_string()),
                ("quality", quality.as_str().to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }

        let body = response.json::<Value>().await?;
        let raw = extract_stream_url(&body).ok_or(CatalogError::MissingStreamUrl)?;
        parse_stream_url(&raw)
    }
}

#[async_trait]
impl CatalogApi for HttpCatalog {
    async fn resolve_stream_url(
        &self,
        track_id: u64,
        quality: AudioQuality,
    ) -> Result<Url, CatalogError> {
        let mut last_error = CatalogError::NoInstances;
        for instance in self.candidate_instances() {
            match self.lookup(&instance, track_id, &quality).await {
                Ok(url) => return Ok(url),
                Err(error) => {
                    log::warn!(
                        "[catalog] stream lookup for {track_id} via {instance} failed: {error}"
                    );
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}

fn same_instance(left: &str, right: &str) -> bool {
    left.trim_end_matches('/') == right.trim_end_matches('/')
}

fn track_endpoint(instance: &str) -> Result<Url, CatalogError> {
    let base = format!("{}/", instance.trim().trim_end_matches('/'));
    let base = Url::parse(&base).map_err(|error| CatalogError::InvalidUrl(error.to_string()))?;
    base.join("track/")
        .map_err(|error| CatalogError::InvalidUrl(error.to_string()))
}

fn parse_stream_url(raw: &str) -> Result<Url, CatalogError> {
    let parsed = Url::parse(raw).map_err(|error| CatalogError::InvalidUrl(error.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(CatalogError::InvalidUrl(format!(
            "unsupported scheme '{scheme}'"
        ))),
    }
}

fn extract_stream_url(value: &Value) -> Option<String> {
    if let Some(array) = value.as_array() {
        return array.iter().find_map(extract_stream_url);
    }

    let direct = value
        .get("OriginalTrackUrl")
        .or_else(|| value.get("originalTrackUrl"))
        .or_else(|| value.get("url"))
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .get("urls")
                .and_then(Value::as_array)
                .and_then(|urls| urls.first())
                .and_then(Value::as_str)
        });

    match direct {
        Some(url) => Some(url.to_string()),
        None => value.get("data").and_then(extract_stream_url),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Resolves every track to a fixed URL, optionally holding each lookup
    /// until released.
    pub struct StaticCatalog {
        pub url: Option<Url>,
        pub gate: Option<Arc<Notify>>,
        pub requests: Mutex<Vec<(u64, AudioQuality)>>,
    }

    impl StaticCatalog {
        pub fn resolving(url: Url) -> Self {
            Self {
                url: Some(url),
                gate: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                url: None,
                gate: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn gated(url: Url, gate: Arc<Notify>) -> Self {
            Self {
                url: Some(url),
                gate: Some(gate),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CatalogApi for StaticCatalog {
        async fn resolve_stream_url(
            &self,
            track_id: u64,
            quality: AudioQuality,
        ) -> Result<Url, CatalogError> {
            self.requests.lock().unwrap().push((track_id, quality));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.url.clone().ok_or(CatalogError::MissingStreamUrl)
        }
    }
}
