//! Inference endpoint client
//!
//! The pipeline depends only on `generate(prompt, max_tokens, temperature,
//! timeout) -> text | error`. Each worker asks the connector for its own
//! client so no HTTP session is shared between workers.
//!
//! The HTTP implementation talks to an Ollama-compatible `/api/generate`
//! endpoint. An optional global ceiling (requests per minute across all
//! workers) is enforced with a shared `governor` limiter.

use crate::config::InferenceConfig;
use crate::error::InferenceError;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type SharedLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// One model call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-call bound, independent of pipeline shutdown
    pub timeout: Duration,
}

/// A worker's private session with the inference endpoint
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError>;
}

/// Creates one independent client per worker
pub trait InferenceConnector: Send + Sync {
    fn connect(&self, worker_id: usize) -> Result<Box<dyn InferenceClient>, InferenceError>;
}

/// Connector for an Ollama-compatible HTTP endpoint
pub struct HttpConnector {
    config: InferenceConfig,
    limiter: Option<Arc<SharedLimiter>>,
}

impl HttpConnector {
    pub fn new(config: InferenceConfig, max_requests_per_minute: Option<u32>) -> Self {
        let limiter = max_requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
        Self { config, limiter }
    }
}

impl InferenceConnector for HttpConnector {
    fn connect(&self, worker_id: usize) -> Result<Box<dyn InferenceClient>, InferenceError> {
        // Dedicated connection pool per worker
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| InferenceError::Connection(format!("failed to build HTTP client: {}", e)))?;

        debug!(worker_id, endpoint = %self.config.endpoint, "Inference session opened");

        Ok(Box::new(HttpInferenceClient {
            client,
            url: format!("{}/api/generate", self.config.endpoint.trim_end_matches('/')),
            model: self.config.model.clone(),
            limiter: self.limiter.clone(),
        }))
    }
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// reqwest-backed client owned by a single worker
pub struct HttpInferenceClient {
    client: Client,
    url: String,
    model: String,
    limiter: Option<Arc<SharedLimiter>>,
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let body = GenerateBody {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            format: "json",
            options: GenerateOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            },
        };

        let timeout_ms = request.timeout.as_millis() as u64;
        let response = self
            .client
            .post(&self.url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Inference endpoint returned error status");
            return Err(InferenceError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout_ms))?;

        Ok(parsed.response)
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout_ms: u64) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout(timeout_ms)
    } else if err.is_connect() || err.is_request() {
        InferenceError::Connection(err.to_string())
    } else if err.is_decode() || err.is_body() {
        InferenceError::InvalidResponse(err.to_string())
    } else {
        InferenceError::Connection(err.to_string())
    }
}
