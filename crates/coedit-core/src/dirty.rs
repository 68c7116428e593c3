//! Dirty tracking for a document session.
//!
//! `DirtyState` is the single source of truth for "does in-memory content
//! differ from what the server has confirmed". Every persist trigger
//! (debounce expiry, periodic tick, visibility change, unload) funnels
//! through the same guarded begin/complete pair, so concurrent duplicate
//! saves cannot happen.
//!
//! Invariant: `last_persisted` is only updated by a completed save with the
//! exact payload captured at begin time. A save that races a newer edit
//! leaves the state dirty, and the next cycle retries with current content.

/// Per-session dirty tracking.
#[derive(Debug, Default)]
pub struct DirtyState {
    latest: String,
    last_persisted: String,
    dirty: bool,
    saving: bool,
}

impl DirtyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed both sides from freshly loaded content (clean state).
    pub fn seed(&mut self, content: &str) {
        self.latest = content.to_string();
        self.last_persisted = content.to_string();
        self.dirty = false;
        self.saving = false;
    }

    /// Record a local content mutation.
    pub fn record_edit(&mut self, content: &str) {
        self.latest = content.to_string();
        self.dirty = true;
    }

    pub fn latest(&self) -> &str {
        &self.latest
    }

    pub fn last_persisted(&self) -> &str {
        &self.last_persisted
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// Whether any content is not yet confirmed persisted.
    pub fn needs_flush(&self) -> bool {
        self.latest != self.last_persisted
    }

    /// Begin a dirty-triggered save. Returns the snapshot to persist, or
    /// None when clean, already saving, or already up to date.
    pub fn begin_save(&mut self) -> Option<String> {
        if !self.dirty || self.saving {
            return None;
        }
        if self.latest == self.last_persisted {
            // Content converged back to the persisted state; nothing to do.
            self.dirty = false;
            return None;
        }
        self.saving = true;
        Some(self.latest.clone())
    }

    /// Begin an unconditional flush (tab hide, unload, slow interval).
    /// Ignores the dirty flag but still refuses to overlap an in-flight save.
    pub fn begin_flush(&mut self) -> Option<String> {
        if self.saving || !self.needs_flush() {
            return None;
        }
        self.saving = true;
        Some(self.latest.clone())
    }

    /// Complete a save started by `begin_save`/`begin_flush`.
    ///
    /// On success, `last_persisted` becomes exactly the saved payload; the
    /// dirty flag clears only if no newer edit arrived meanwhile. On failure
    /// the state stays dirty so the next cycle retries.
    pub fn complete_save(&mut self, payload: &str, ok: bool) {
        self.saving = false;
        if !ok {
            self.dirty = true;
            return;
        }
        self.last_persisted = payload.to_string();
        if self.latest == payload {
            self.dirty = false;
        }
    }
}
