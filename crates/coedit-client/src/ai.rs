//! HTTP-backed Assistant that streams the response body.
//!
//! The AI endpoint returns a plain-text streaming body. Chunks are folded
//! into a growing buffer and delivered cumulatively (full text so far), the
//! shape the StreamInsertionController expects. Byte chunks may split UTF-8
//! sequences, so only the valid prefix is surfaced per chunk.

use async_trait::async_trait;
use coedit_core::assist::{AssistError, AssistRequest, Assistant, Result};
use futures::StreamExt;

fn endpoint(web_search: bool) -> &'static str {
    if web_search {
        "/ai/ask_web"
    } else {
        "/ai/ask"
    }
}

/// REST client for the AI writing service.
pub struct HttpAssistant {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAssistant {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, request: &AssistRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(request)
            .send()
            .await
            .map_err(|e| AssistError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AssistError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn ask(&self, request: &AssistRequest) -> Result<String> {
        let response = self.post(endpoint(false), request).await?;
        response
            .text()
            .await
            .map_err(|e| AssistError::Request(e.to_string()))
    }

    async fn ask_streaming(
        &self,
        request: &AssistRequest,
        web_search: bool,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String> {
        let response = self.post(endpoint(web_search), request).await?;
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(item) = stream.next().await {
            let bytes = item.map_err(|e| AssistError::Interrupted(e.to_string()))?;
            buffer.extend_from_slice(&bytes);

            // A byte chunk may end mid-codepoint; surface the valid prefix.
            let valid = match std::str::from_utf8(&buffer) {
                Ok(text) => text.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(e) => {
                    return Err(AssistError::Interrupted(format!(
                        "invalid utf-8 in stream: {}",
                        e
                    )))
                }
            };
            if valid > 0 {
                if let Ok(text) = std::str::from_utf8(&buffer[..valid]) {
                    on_chunk(text);
                }
            }
        }

        String::from_utf8(buffer).map_err(|e| AssistError::Interrupted(e.to_string()))
    }
}
