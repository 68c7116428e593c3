//! HTTP-backed DocumentStore against the documents REST API.
//!
//! Routes:
//! - `GET  /documents?user_id={id}` - list owned + shared documents
//! - `POST /documents`              - create
//! - `GET  /documents/{id}`         - fetch
//! - `PUT  /documents/{id}?user_id={id}` - partial update (title/content)
//! - `DELETE /documents/{id}?user_id={id}`
//!
//! Any non-success response maps to a recoverable `StoreError`; the
//! coordinator retries persistence on its periodic cycle.

use async_trait::async_trait;
use coedit_core::document::{Document, DocumentPatch, NewDocument};
use coedit_core::store::{DocumentStore, Result, StoreError};
use reqwest::StatusCode;

/// REST client for the documents API.
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    /// Create a store for an HTTP base URL, e.g. `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn request_error(e: reqwest::Error) -> StoreError {
    StoreError::Request(e.to_string())
}

fn decode_error(e: reqwest::Error) -> StoreError {
    StoreError::Decode(e.to_string())
}

fn check_status(status: StatusCode, id: Option<i64>) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        if let Some(id) = id {
            return Err(StoreError::NotFound(id));
        }
    }
    Err(StoreError::Status(status.as_u16()))
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn list(&self, user_id: i64) -> Result<Vec<Document>> {
        let response = self
            .client
            .get(self.url("/documents"))
            .query(&[("user_id", user_id)])
            .send()
            .await
            .map_err(request_error)?;
        check_status(response.status(), None)?;
        response.json().await.map_err(decode_error)
    }

    async fn fetch(&self, id: i64) -> Result<Document> {
        let response = self
            .client
            .get(self.url(&format!("/documents/{}", id)))
            .send()
            .await
            .map_err(request_error)?;
        check_status(response.status(), Some(id))?;
        response.json().await.map_err(decode_error)
    }

    async fn create(&self, new: NewDocument) -> Result<Document> {
        let response = self
            .client
            .post(self.url("/documents"))
            .json(&new)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response.status(), None)?;
        response.json().await.map_err(decode_error)
    }

    async fn update(&self, id: i64, user_id: i64, patch: DocumentPatch) -> Result<Document> {
        let response = self
            .client
            .put(self.url(&format!("/documents/{}", id)))
            .query(&[("user_id", user_id)])
            .json(&patch)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response.status(), Some(id))?;
        response.json().await.map_err(decode_error)
    }

    async fn delete(&self, id: i64, user_id: i64) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/documents/{}", id)))
            .query(&[("user_id", user_id)])
            .send()
            .await
            .map_err(request_error)?;
        check_status(response.status(), Some(id))
    }
}
