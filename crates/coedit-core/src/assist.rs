//! Assistant trait abstraction over the AI writing service.
//!
//! The service takes `{context, question}` and yields either a single final
//! string or a sequence of cumulative text chunks (the full response so far,
//! not deltas) ending in completion. The transport is the implementation's
//! business; the core only needs per-chunk callback delivery.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssistError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Service returned status {0}")]
    Status(u16),

    #[error("Stream interrupted: {0}")]
    Interrupted(String),
}

pub type Result<T> = std::result::Result<T, AssistError>;

/// A prompt with its document context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AssistRequest {
    pub context: String,
    pub question: String,
}

/// The AI writing service contract.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Single-shot answer.
    async fn ask(&self, request: &AssistRequest) -> Result<String>;

    /// Streaming answer: `on_chunk` receives cumulative text. Returns the
    /// final text on completion.
    async fn ask_streaming(
        &self,
        request: &AssistRequest,
        web_search: bool,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String>;
}

/// Remove pending response text from a context snapshot so the model does
/// not see its own half-written answer as document content.
pub fn strip_pending_response(context: &str, pending: &str) -> String {
    let stripped = if pending.is_empty() {
        context.to_string()
    } else {
        context.split(pending).collect::<Vec<_>>().join("")
    };
    collapse_whitespace(&stripped)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out.trim().to_string()
}

/// Scripted assistant for tests: replays a fixed sequence of cumulative
/// chunks, optionally failing partway through.
pub struct ScriptedAssistant {
    chunks: Vec<String>,
    fail_after: Option<usize>,
}

impl ScriptedAssistant {
    pub fn new(chunks: Vec<&str>) -> Self {
        Self {
            chunks: chunks.into_iter().map(String::from).collect(),
            fail_after: None,
        }
    }

    /// Fail with `Interrupted` after delivering `count` chunks.
    pub fn failing_after(chunks: Vec<&str>, count: usize) -> Self {
        Self {
            chunks: chunks.into_iter().map(String::from).collect(),
            fail_after: Some(count),
        }
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn ask(&self, _request: &AssistRequest) -> Result<String> {
        Ok(self.chunks.last().cloned().unwrap_or_default())
    }

    async fn ask_streaming(
        &self,
        _request: &AssistRequest,
        _web_search: bool,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String> {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if self.fail_after == Some(i) {
                return Err(AssistError::Interrupted("scripted failure".into()));
            }
            on_chunk(chunk);
        }
        Ok(self.chunks.last().cloned().unwrap_or_default())
    }
}
