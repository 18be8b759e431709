//! Image enrichment through an OpenAI-compatible image generation endpoint.
//!
//! Every generator returns the URL of exactly one square image. The caller
//! decides what a failure means; for item materialization it is never fatal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use crate::config::EnrichmentConfiguration;
use crate::error::EnrichmentError;

pub const IMAGE_COUNT: u8 = 1;
pub const IMAGE_SIZE: &str = "256x256";

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub n: u8,
    pub size: String,
}

impl ImageRequest {
    pub fn for_prompt(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            n: IMAGE_COUNT,
            size: IMAGE_SIZE.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize, Debug)]
struct ImageData {
    url: Option<String>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<String, EnrichmentError>;
}

/// Build the generator the configuration asks for.
pub fn create_generator(config: &EnrichmentConfiguration) -> anyhow::Result<Box<dyn ImageGenerator>> {
    match &config.api_key {
        Some(api_key) => Ok(Box::new(OpenAiImageClient::new(&config.api_url, api_key, config.timeout)?)),
        None => Ok(Box::new(DisabledImageGenerator)),
    }
}

#[derive(Clone)]
pub struct OpenAiImageClient {
    http_client: Client,
    url: String,
}

impl OpenAiImageClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        auth.set_sensitive(true);

        let mut header_map = HeaderMap::new();
        header_map.insert(AUTHORIZATION, auth);
        header_map.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = ClientBuilder::new()
            .default_headers(header_map)
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;
        let url = format!("{}/images/generations", base_url.trim_end_matches('/'));

        Ok(Self {
            http_client,
            url,
        })
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    async fn generate(&self, request: &ImageRequest) -> Result<String, EnrichmentError> {
        let http_response = self.http_client.post(&self.url)
            .json(request)
            .send()
            .await?;
        let status = http_response.status();
        let response_str = http_response.text().await?;
        if !status.is_success() {
            return Err(EnrichmentError::Status { code: status.as_u16(), body: response_str });
        }
        parse_image_url(&response_str)
    }
}

fn parse_image_url(body: &str) -> Result<String, EnrichmentError> {
    let response: ImageResponse = serde_json::from_str(body)
        .map_err(|e| EnrichmentError::Malformed(e.to_string()))?;
    let first = response.data.into_iter().next()
        .ok_or_else(|| EnrichmentError::Malformed("empty data list".to_string()))?;
    match first.url {
        Some(url) if !url.trim().is_empty() => Ok(url),
        _ => Err(EnrichmentError::Malformed("first entry has no url".to_string())),
    }
}

/// Used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledImageGenerator;

#[async_trait]
impl ImageGenerator for DisabledImageGenerator {
    async fn generate(&self, _request: &ImageRequest) -> Result<String, EnrichmentError> {
        Err(EnrichmentError::Disabled)
    }
}

/// Replays canned results in order and records every request it receives.
/// Once the script runs out every call fails as malformed.
#[derive(Default)]
pub struct ScriptedImageGenerator {
    script: Mutex<VecDeque<Result<String, EnrichmentError>>>,
    requests: Mutex<Vec<ImageRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedImageGenerator {
    pub fn new(script: impl IntoIterator<Item = Result<String, EnrichmentError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn returning(url: &str) -> Self {
        Self::new([Ok(url.to_string())])
    }

    pub fn failing(error: EnrichmentError) -> Self {
        Self::new([Err(error)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ImageGenerator for ScriptedImageGenerator {
    async fn generate(&self, request: &ImageRequest) -> Result<String, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| Err(EnrichmentError::Malformed("script exhausted".to_string())))
    }
}
