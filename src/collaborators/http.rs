//! HTTP Collaborators
//!
//! JSON-over-HTTP clients for a remote content generator and for the metered
//! publish API. Both are plain POSTs; the orchestrators bound each call with
//! their own timeout on top of the client's.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ContentGenerator, GenerationRequest, PublishApi, PublishedPost};

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    options: Vec<String>,
}

/// Remote content generator
///
/// POSTs the [`GenerationRequest`] as JSON and expects `{"options": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
}

impl HttpGenerator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        tracing::debug!("Requesting {} drafts from {}", request.max_options, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .context("Failed to reach content generator")?;

        if !response.status().is_success() {
            anyhow::bail!("Content generator returned status {}", response.status());
        }

        let body: GenerationResponse = response
            .json()
            .await
            .context("Failed to decode content generator response")?;
        Ok(body.options)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    data: CreatedPost,
}

/// Metered publish API client
///
/// POSTs `{"text": ...}` with an optional bearer token and expects
/// `{"data": {"id": "..."}}` back.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpPublisher {
    pub fn new(url: impl Into<String>, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            bearer_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PublishApi for HttpPublisher {
    async fn publish(&self, text: &str) -> Result<PublishedPost> {
        tracing::debug!("Posting {} chars to {}", text.chars().count(), self.url);

        let mut request = self.client.post(&self.url).json(&json!({ "text": text }));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Failed to reach publish API")?;
        let status = response.status();
        if !status.is_success() {
            // Duplicates come back as 403, throttling as 429
            anyhow::bail!("Publish API returned status {}", status);
        }

        let body: CreatePostResponse = response
            .json()
            .await
            .context("Failed to decode publish API response")?;
        Ok(PublishedPost {
            external_id: body.data.id,
        })
    }
}
