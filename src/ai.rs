// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP client for the remote AI service
//!
//! Two JSON endpoints are used: one suggests filenames from a prompt, the
//! other categorizes a media file from its URL and a little metadata.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::{RenamerError, Result};

/// Metadata sent along with a categorization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunedMeta {
    pub file_name: String,
    pub width: u64,
    pub height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizeRequest {
    pub file: String,
    pub meta: PrunedMeta,
    /// Base64 image bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// What the categorization endpoint answers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Categorization {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Serialize)]
struct SuggestRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct SuggestResponse {
    #[serde(default)]
    filename: String,
}

/// The AI operations the rest of the crate depends on
#[async_trait]
pub trait FilenameAi: Send + Sync {
    async fn suggest_filename(&self, prompt: &str) -> Result<String>;

    async fn categorize(&self, request: &CategorizeRequest) -> Result<Categorization>;
}

/// AI service client
pub struct AiClient {
    client: Client,
    url: String,
    categorize_url: String,
    api_key: String,
    retries: u32,
}

impl AiClient {
    /// Create a new client from engine settings
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            categorize_url: config.categorize_url.clone(),
            api_key: config.api_key.clone(),
            retries: config.retries,
        })
    }

    /// Whether background categorization has an endpoint
    pub fn can_categorize(&self) -> bool {
        !self.categorize_url.is_empty()
    }

    fn post(&self, url: &str) -> RequestBuilder {
        let request = self.client.post(url);
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    async fn suggest_once(&self, prompt: &str) -> Result<String> {
        debug!("Requesting filename suggestion from {}", self.url);

        let response = self.post(&self.url).json(&SuggestRequest { prompt }).send().await?;

        if !response.status().is_success() {
            return Err(RenamerError::AiUnavailable(format!(
                "AI service returned status {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let result: SuggestResponse = serde_json::from_str(&body)?;
        Ok(result.filename)
    }

    async fn categorize_once(&self, request: &CategorizeRequest) -> Result<Categorization> {
        debug!("Requesting categorization for {}", request.file);

        let response = self.post(&self.categorize_url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenamerError::AiUnavailable(format!(
                "AI categorizer returned status {} for {}",
                status, request.meta.file_name
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            RenamerError::AiUnavailable(format!(
                "AI categorizer sent invalid JSON for {}: {}",
                request.meta.file_name, e
            ))
        })
    }
}

/// Seconds to wait before retry number `attempt` (1-based)
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.saturating_sub(1).min(6)))
}

#[async_trait]
impl FilenameAi for AiClient {
    async fn suggest_filename(&self, prompt: &str) -> Result<String> {
        if self.url.is_empty() {
            return Err(RenamerError::Config("AI endpoint not configured".to_string()));
        }

        let mut last_error = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!("Retrying AI request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.suggest_once(prompt).await {
                Ok(filename) => return Ok(filename),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RenamerError::AiUnavailable("Unknown error".to_string())))
    }

    async fn categorize(&self, request: &CategorizeRequest) -> Result<Categorization> {
        if !self.can_categorize() {
            return Err(RenamerError::Config("AI categorizer endpoint not configured".to_string()));
        }

        let mut last_error = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!("Retrying categorization in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.categorize_once(request).await {
                Ok(result) => return Ok(result),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RenamerError::AiUnavailable("Unknown error".to_string())))
    }
}
