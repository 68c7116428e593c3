//! DocumentStore trait abstraction over REST persistence.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `HttpStore` (in coedit-client) - Talks to the documents API
//!
//! Every failure is recoverable: the coordinator reports it and retries on
//! its periodic cycle. Nothing here is fatal to a session.

use crate::document::{Document, DocumentPatch, NewDocument};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Document not found: {0}")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence contract for documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents owned by or shared with a user.
    async fn list(&self, user_id: i64) -> Result<Vec<Document>>;

    /// Fetch a single document.
    async fn fetch(&self, id: i64) -> Result<Document>;

    /// Create a document.
    async fn create(&self, new: NewDocument) -> Result<Document>;

    /// Partial update: title and/or content.
    async fn update(&self, id: i64, user_id: i64, patch: DocumentPatch) -> Result<Document>;

    /// Delete a document.
    async fn delete(&self, id: i64, user_id: i64) -> Result<()>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    async fn list(&self, user_id: i64) -> Result<Vec<Document>> {
        (**self).list(user_id).await
    }

    async fn fetch(&self, id: i64) -> Result<Document> {
        (**self).fetch(id).await
    }

    async fn create(&self, new: NewDocument) -> Result<Document> {
        (**self).create(new).await
    }

    async fn update(&self, id: i64, user_id: i64, patch: DocumentPatch) -> Result<Document> {
        (**self).update(id, user_id, patch).await
    }

    async fn delete(&self, id: i64, user_id: i64) -> Result<()> {
        (**self).delete(id, user_id).await
    }
}

/// In-memory store for testing.
pub struct InMemoryStore {
    docs: RwLock<HashMap<i64, Document>>,
    next_id: AtomicI64,
    fail_updates: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            fail_updates: AtomicBool::new(false),
        }
    }

    /// Make subsequent updates fail, to exercise the retry path.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn list(&self, user_id: i64) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs
            .values()
            .filter(|d| d.owner_id == user_id)
            .cloned()
            .collect())
    }

    async fn fetch(&self, id: i64) -> Result<Document> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        docs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn create(&self, new: NewDocument) -> Result<Document> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let doc = Document {
            id,
            title: new.title,
            content: new.content,
            owner_id: new.owner_id,
            created_at: String::new(),
        };
        self.docs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, doc.clone());
        Ok(doc)
    }

    async fn update(&self, id: i64, _user_id: i64, patch: DocumentPatch) -> Result<Document> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Status(503));
        }
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        let doc = docs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(title) = patch.title {
            doc.title = title;
        }
        if let Some(content) = patch.content {
            doc.content = content;
        }
        Ok(doc.clone())
    }

    async fn delete(&self, id: i64, _user_id: i64) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }
}
