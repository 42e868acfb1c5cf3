//! Link preview collaborator

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Preview of the first link in a message body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Fetches content previews for message bodies.
///
/// `Ok(None)` means the body has nothing worth previewing. Errors are
/// ignored by the message pipeline.
#[async_trait]
pub trait PreviewService: Send + Sync {
    async fn get_preview(&self, body: &str) -> Result<Option<Preview>>;
}

/// Preview service that never produces anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreview;

#[async_trait]
impl PreviewService for NoPreview {
    async fn get_preview(&self, _body: &str) -> Result<Option<Preview>> {
        Ok(None)
    }
}
