//! StreamInsertionController: merges an incrementally-arriving AI response
//! into a live document.
//!
//! One AI turn owns one `StreamRange`. Chunks arrive as cumulative text (the
//! full response so far, not deltas); each chunk's new suffix is inserted as
//! plain text at the range end, which grows monotonically. Markdown is only
//! converted to structured blocks once, at accept time, so partial markdown
//! is never re-parsed per chunk.
//!
//! Lifecycle: `Idle → Streaming → {Ready | Failed}`, with accept / discard /
//! insert-below / retry legal from any live state and always returning to
//! `Idle`. Chunks arriving in any state but `Streaming` are ignored; that is
//! the guard against late chunks re-appending into a discarded range.
//!
//! Positions are plain char offsets, so no other edits may move the range
//! while a stream is live. The session enforces that with its document-busy
//! exclusion (remote snapshots are not applied while a range is active).

use crate::editor::{EditorModel, Insertion};
use crate::markdown;
use tracing::{debug, warn};

/// The document span currently occupied by not-yet-finalized AI text.
///
/// Half-open `[start, end)`; `start` is fixed at stream begin, `end` grows
/// as chunks arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    pub start: usize,
    pub end: usize,
}

/// Controller state for one AI turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No active response.
    Idle,
    /// Chunks are arriving.
    Streaming,
    /// Stream finished; awaiting a user decision.
    Ready,
    /// Stream failed mid-flight; partial text stays for manual discard or
    /// retry.
    Failed,
}

/// Manages the lifecycle of one streamed AI response inside the document.
pub struct StreamInsertionController {
    state: StreamState,
    range: Option<StreamRange>,
    /// Pre-stream selection end; insert-below targets this, independent of
    /// where `end` has moved since.
    anchor: usize,
    /// Byte length of the last cumulative chunk (for delta slicing).
    seen_bytes: usize,
    /// Full response text so far.
    buffer: String,
    /// Prompt of the current/last turn, for retry.
    last_prompt: Option<String>,
    /// User-visible error from a failed stream.
    error: Option<String>,
}

impl StreamInsertionController {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            range: None,
            anchor: 0,
            seen_bytes: 0,
            buffer: String::new(),
            last_prompt: None,
            error: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether a range is currently live in the document.
    pub fn is_active(&self) -> bool {
        self.range.is_some()
    }

    pub fn range(&self) -> Option<StreamRange> {
        self.range
    }

    /// Text accumulated so far (pending, not yet finalized).
    pub fn pending_text(&self) -> &str {
        &self.buffer
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Begin a new turn at the current selection end.
    ///
    /// Any live range is discarded first: two overlapping ranges would
    /// desynchronize as the document mutates, so at most one ever exists.
    pub fn start<E: EditorModel>(&mut self, editor: &mut E, prompt: &str) {
        if self.is_active() {
            debug!("Starting a new prompt with a live range; discarding the old one");
            self.discard(editor);
        }

        let (_, to) = editor.selection();
        self.range = Some(StreamRange { start: to, end: to });
        self.anchor = to;
        self.seen_bytes = 0;
        self.buffer.clear();
        self.last_prompt = Some(prompt.to_string());
        self.error = None;
        self.state = StreamState::Streaming;
    }

    /// Apply one cumulative chunk.
    ///
    /// The delta beyond the previously seen text is inserted at the range
    /// end. Chunks that do not extend the cumulative text (duplicates,
    /// reordered arrivals) are no-ops, and chunks outside the `Streaming`
    /// state are dropped entirely.
    pub fn append<E: EditorModel>(&mut self, editor: &mut E, chunk: &str) {
        if self.state != StreamState::Streaming {
            debug!("Dropping late chunk ({} bytes) in {:?} state", chunk.len(), self.state);
            return;
        }
        let range = match self.range {
            Some(range) => range,
            None => return,
        };

        if chunk.len() <= self.seen_bytes {
            return;
        }
        let delta = match chunk.get(self.seen_bytes..) {
            Some(delta) => delta,
            None => {
                // Not a char boundary: the chunk does not extend what we
                // already inserted. Wait for the next one.
                warn!("Cumulative chunk not aligned with previous text; skipping");
                return;
            }
        };
        if delta.is_empty() {
            return;
        }

        editor.insert_text(range.end, delta);
        self.range = Some(StreamRange {
            start: range.start,
            end: range.end + delta.chars().count(),
        });
        self.seen_bytes = chunk.len();
        self.buffer = chunk.to_string();
    }

    /// Mark the stream as finished; the range stays live awaiting a
    /// decision.
    pub fn complete(&mut self) {
        if self.state == StreamState::Streaming {
            self.state = StreamState::Ready;
        }
    }

    /// Mark the stream as failed. Partial text stays in the document,
    /// selectable for manual discard or retry; it is never silently
    /// abandoned.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.state == StreamState::Streaming {
            self.state = StreamState::Failed;
            self.error = Some(message.into());
        }
    }

    /// Accept: replace the streamed plain text with its markdown-converted
    /// structured form in one atomic edit.
    pub fn accept<E: EditorModel>(&mut self, editor: &mut E) {
        if let Some(range) = self.range {
            if !self.buffer.is_empty() {
                let blocks = markdown::to_blocks(&self.buffer);
                editor.replace_range(range.start, range.end, Insertion::Blocks(blocks));
            }
        }
        self.clear();
    }

    /// Discard: delete the streamed text entirely.
    pub fn discard<E: EditorModel>(&mut self, editor: &mut E) {
        if let Some(range) = self.range {
            editor.replace_range(range.start, range.end, Insertion::Text(String::new()));
        }
        self.clear();
    }

    /// Insert-below: remove the in-place text, then insert the converted
    /// blocks at the original pre-stream anchor so the response lands as a
    /// new block after the original selection.
    pub fn insert_below<E: EditorModel>(&mut self, editor: &mut E) {
        if let Some(range) = self.range {
            editor.replace_range(range.start, range.end, Insertion::Text(String::new()));
            if !self.buffer.is_empty() {
                let blocks = markdown::to_blocks(&self.buffer);
                editor.replace_range(self.anchor, self.anchor, Insertion::Blocks(blocks));
            }
        }
        self.clear();
    }

    /// Retry: discard the current text and hand back the prompt for
    /// resubmission as a fresh turn.
    pub fn retry<E: EditorModel>(&mut self, editor: &mut E) -> Option<String> {
        let prompt = self.last_prompt.clone();
        self.discard(editor);
        prompt
    }

    fn clear(&mut self) {
        self.state = StreamState::Idle;
        self.range = None;
        self.seen_bytes = 0;
        self.buffer.clear();
        self.error = None;
    }
}

impl Default for StreamInsertionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::BlockKind;
    use crate::editor::InMemoryEditor;

    fn editor_with(text: &str, cursor: usize) -> InMemoryEditor {
        let mut editor = InMemoryEditor::new();
        editor.insert_text(0, text);
        editor.set_selection(cursor, cursor);
        editor.poll_change();
        editor
    }

    // ==================== Streaming ====================

    #[test]
    fn test_cumulative_chunks_insert_deltas() {
        let mut editor = editor_with("before ", 7);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "write something");
        stream.append(&mut editor, "A");
        stream.append(&mut editor, "AB");
        stream.append(&mut editor, "ABC");

        assert_eq!(editor.plain_text(), "before ABC");
        assert_eq!(stream.range(), Some(StreamRange { start: 7, end: 10 }));
    }

    #[test]
    fn test_delta_monotonicity() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        // Duplicate and regressive chunks yield zero insertion.
        stream.append(&mut editor, "AB");
        stream.append(&mut editor, "AB");
        stream.append(&mut editor, "A");
        stream.append(&mut editor, "ABCD");

        assert_eq!(editor.plain_text(), "ABCD");
        assert_eq!(stream.range().unwrap().end, 4);
    }

    #[test]
    fn test_multibyte_chunks() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "caf");
        stream.append(&mut editor, "café");

        assert_eq!(editor.plain_text(), "café");
        // Range grows by chars, not bytes.
        assert_eq!(stream.range().unwrap().end, 4);
    }

    #[test]
    fn test_streamed_newlines_grow_range_consistently() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "one\ntwo");

        assert_eq!(editor.plain_text(), "one\ntwo");
        assert_eq!(stream.range().unwrap().end, 7);

        stream.append(&mut editor, "one\ntwo\nthree");
        assert_eq!(editor.plain_text(), "one\ntwo\nthree");
    }

    // ==================== Terminal actions ====================

    #[test]
    fn test_discard_removes_all_streamed_text() {
        let mut editor = editor_with("keep ", 5);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "A");
        stream.append(&mut editor, "AB");
        stream.append(&mut editor, "ABC");
        stream.discard(&mut editor);

        assert_eq!(editor.plain_text(), "keep ");
        assert_eq!(stream.state(), StreamState::Idle);
        assert!(!stream.is_active());
    }

    #[test]
    fn test_late_chunk_after_discard_is_ignored() {
        let mut editor = editor_with("keep ", 5);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "ABC");
        stream.discard(&mut editor);
        stream.append(&mut editor, "ABCD");

        assert_eq!(editor.plain_text(), "keep ");
    }

    #[test]
    fn test_accept_converts_markdown() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "# Title\nSome **bold** text");
        stream.complete();
        stream.accept(&mut editor);

        assert_eq!(editor.plain_text(), "Title\nSome bold text");
        assert_eq!(editor.blocks()[0].kind, BlockKind::Heading(1));
        assert!(editor.blocks()[1].spans.iter().any(|s| s.marks.bold));
        assert_eq!(stream.state(), StreamState::Idle);
    }

    #[test]
    fn test_accept_mid_stream_blocks_late_chunks() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "partial");
        stream.accept(&mut editor);
        stream.append(&mut editor, "partial plus more");

        assert_eq!(editor.plain_text(), "partial");
    }

    #[test]
    fn test_insert_below_lands_at_anchor() {
        let mut editor = editor_with("intro text", 5);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "answer");
        stream.complete();
        stream.insert_below(&mut editor);

        // Streamed text removed in place, blocks inserted at the original
        // selection end.
        assert_eq!(editor.plain_text(), "intro\nanswer\n text");
        assert_eq!(stream.state(), StreamState::Idle);
    }

    #[test]
    fn test_retry_discards_and_returns_prompt() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "summarize this");
        stream.append(&mut editor, "bad answer");
        let prompt = stream.retry(&mut editor);

        assert_eq!(prompt.as_deref(), Some("summarize this"));
        assert_eq!(editor.plain_text(), "");
        assert_eq!(stream.state(), StreamState::Idle);
    }

    #[test]
    fn test_empty_response_accept_is_clean() {
        let mut editor = editor_with("text", 4);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.complete();
        stream.accept(&mut editor);

        assert_eq!(editor.plain_text(), "text");
        assert_eq!(stream.state(), StreamState::Idle);
    }

    // ==================== Range exclusivity ====================

    #[test]
    fn test_new_prompt_resolves_existing_range() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "first");
        stream.append(&mut editor, "old text");

        // Starting again discards the first range; only one is ever live.
        stream.start(&mut editor, "second");
        assert_eq!(editor.plain_text(), "");
        assert!(stream.is_active());

        stream.append(&mut editor, "new");
        assert_eq!(editor.plain_text(), "new");
    }

    // ==================== Error path ====================

    #[test]
    fn test_failed_stream_keeps_partial_text_for_discard() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "partial an");
        stream.fail("connection reset");

        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(stream.error(), Some("connection reset"));
        // Partial text is still there, and still removable.
        assert_eq!(editor.plain_text(), "partial an");

        stream.discard(&mut editor);
        assert_eq!(editor.plain_text(), "");
    }

    #[test]
    fn test_chunks_after_failure_are_dropped() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "p");
        stream.append(&mut editor, "ab");
        stream.fail("timeout");
        stream.append(&mut editor, "abcd");

        assert_eq!(editor.plain_text(), "ab");
    }

    #[test]
    fn test_retry_after_failure() {
        let mut editor = editor_with("", 0);
        let mut stream = StreamInsertionController::new();

        stream.start(&mut editor, "the prompt");
        stream.append(&mut editor, "junk");
        stream.fail("boom");

        let prompt = stream.retry(&mut editor);
        assert_eq!(prompt.as_deref(), Some("the prompt"));
        assert_eq!(editor.plain_text(), "");
    }
}
