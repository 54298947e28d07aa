//! External Collaborators
//!
//! The content generator and the metered publish API are opaque, possibly
//! slow, possibly failing services. The orchestrators only see these traits;
//! implementations live in submodules.

pub mod http;
pub mod template;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::modes::ModeTag;

pub use http::{HttpGenerator, HttpPublisher};
pub use template::TemplateGenerator;

/// Everything the content generator is told about one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Free-text notes to turn into drafts
    pub notes: String,

    pub mood: Option<String>,

    /// What's next / closing angle
    pub angle: Option<String>,

    /// Content angle picked by the mode rotator
    pub mode: ModeTag,

    pub max_options: u32,

    pub max_chars: u32,
}

/// Turns notes into draft posts
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Vec<String>>;
}

/// Result of a successful direct post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub external_id: String,
}

/// The metered write API
#[async_trait]
pub trait PublishApi: Send + Sync {
    async fn publish(&self, text: &str) -> anyhow::Result<PublishedPost>;
}

/// Publish API stand-in used when no endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPublisher;

#[async_trait]
impl PublishApi for DisabledPublisher {
    async fn publish(&self, _text: &str) -> anyhow::Result<PublishedPost> {
        Err(anyhow::anyhow!("metered publish API is not configured"))
    }
}
