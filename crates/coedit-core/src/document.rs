//! Document records as exchanged with the persistence layer.

use crate::content::{self, Block};
use serde::{Deserialize, Serialize};

/// A stored document.
///
/// `content` is the serialized editor tree, kept opaque for transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub owner_id: i64,
    pub created_at: String,
}

impl Document {
    /// Interpret the stored content, falling back to a plain-text wrapper.
    pub fn content_blocks(&self) -> Vec<Block> {
        content::parse_or_wrap(&self.content)
    }
}

/// Payload for creating a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    pub owner_id: i64,
}

/// Partial update: title and/or content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl DocumentPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: Some(content.into()),
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }
}
