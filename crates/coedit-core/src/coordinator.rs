//! SyncCoordinator: decides when local edits leave the client and when
//! remote snapshots are applied.
//!
//! Local→remote: every local mutation records the latest snapshot and arms a
//! trailing debounce. When the debounce fires, one `sync` operation goes out
//! over the socket and one guarded persist goes to the store. A fast
//! re-check interval retries dirty content that missed the debounce (for
//! example after a failed persist), and a slow interval plus explicit
//! `flush()` calls (tab hide, unload) bound staleness.
//!
//! Remote→local: a snapshot is applied only if it comes from another user,
//! is a `sync` operation, and parses as a structured document. The apply
//! happens under the `applying_remote` guard so the change notification it
//! provokes does not arm another outbound send. That guard is the
//! feedback-loop break: without it, two clients would bounce the same
//! snapshot back and forth forever.
//!
//! All timing is explicit (`now_ms`), driven by the shell's ticker.

use crate::content::{self, Block};
use crate::dirty::DirtyState;
use crate::protocol::{OpKind, Operation};
use crate::schedule::{Debounce, Recurring};
use tracing::{debug, warn};

/// Timing knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct SyncTiming {
    /// Trailing debounce for body edits.
    pub body_debounce_ms: u64,
    /// Trailing debounce for title edits.
    pub title_debounce_ms: u64,
    /// Fast re-check period for dirty-but-unsaved content.
    pub recheck_ms: u64,
    /// Slow unconditional flush period.
    pub flush_ms: u64,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            body_debounce_ms: 1000,
            title_debounce_ms: 500,
            recheck_ms: 2000,
            flush_ms: 15_000,
        }
    }
}

/// IO the shell must perform on behalf of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Send a snapshot over the collaboration socket.
    SendSync { content: String },
    /// Persist a snapshot via the document store; the shell reports the
    /// outcome through `persist_completed`.
    Persist { content: String },
    /// Persist a title change.
    PersistTitle { title: String },
}

/// Why an inbound operation was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Our own write echoed back by the relay.
    OwnEcho,
    /// Reserved operation kind (insert/delete) or anything but sync.
    NotSync,
    /// Sync operation without a content payload.
    MissingContent,
    /// Content payload is not a structured document.
    Unstructured,
}

/// Outcome of inspecting an inbound operation.
#[derive(Debug)]
pub enum RemoteDecision {
    /// Replace local content wholesale with this snapshot.
    Apply { blocks: Vec<Block>, content: String },
    Ignore(IgnoreReason),
}

/// Coordinates local persistence and remote application for one document
/// session.
pub struct SyncCoordinator {
    user_id: i64,
    dirty: DirtyState,
    body_debounce: Debounce,
    title_debounce: Debounce,
    recheck: Recurring,
    slow_flush: Recurring,
    pending_title: Option<String>,
    /// Armed by genuinely local edits; consumed when the debounce fires.
    /// Edits provoked by a remote apply never arm it.
    send_armed: bool,
    applying_remote: bool,
}

impl SyncCoordinator {
    pub fn new(user_id: i64) -> Self {
        Self::with_timing(user_id, SyncTiming::default())
    }

    pub fn with_timing(user_id: i64, timing: SyncTiming) -> Self {
        Self {
            user_id,
            dirty: DirtyState::new(),
            body_debounce: Debounce::new(timing.body_debounce_ms),
            title_debounce: Debounce::new(timing.title_debounce_ms),
            recheck: Recurring::new(timing.recheck_ms),
            slow_flush: Recurring::new(timing.flush_ms),
            pending_title: None,
            send_armed: false,
            applying_remote: false,
        }
    }

    /// Seed dirty tracking from freshly loaded content.
    pub fn seed(&mut self, content: &str) {
        self.dirty.seed(content);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    pub fn needs_flush(&self) -> bool {
        self.dirty.needs_flush()
    }

    /// Record a local content mutation.
    ///
    /// Mutations caused by applying a remote snapshot still mark the session
    /// dirty (this client persists what it displays), but do not arm an
    /// outbound send.
    pub fn on_local_edit(&mut self, content: &str, now_ms: u64) {
        self.dirty.record_edit(content);
        self.body_debounce.trigger(now_ms);
        if self.applying_remote {
            debug!("Content change during remote apply; outbound send suppressed");
        } else {
            self.send_armed = true;
        }
    }

    /// Record a local title edit.
    pub fn on_title_edit(&mut self, title: &str, now_ms: u64) {
        self.pending_title = Some(title.to_string());
        self.title_debounce.trigger(now_ms);
    }

    /// Inspect an inbound operation and decide whether to apply it.
    pub fn on_remote(&self, operation: &Operation) -> RemoteDecision {
        if operation.user_id == self.user_id {
            return RemoteDecision::Ignore(IgnoreReason::OwnEcho);
        }
        if operation.op != OpKind::Sync {
            return RemoteDecision::Ignore(IgnoreReason::NotSync);
        }
        let raw = match operation.content.as_deref() {
            Some(raw) => raw,
            None => return RemoteDecision::Ignore(IgnoreReason::MissingContent),
        };
        match content::parse_structured(raw) {
            Ok(blocks) => RemoteDecision::Apply {
                blocks,
                content: raw.to_string(),
            },
            Err(e) => {
                debug!("Dropping unstructured remote snapshot: {}", e);
                RemoteDecision::Ignore(IgnoreReason::Unstructured)
            }
        }
    }

    /// Mark that a remote snapshot is being applied to the editor. The
    /// change notification fired by the replacement must land between this
    /// and `finish_remote_apply`.
    pub fn begin_remote_apply(&mut self) {
        self.applying_remote = true;
    }

    pub fn finish_remote_apply(&mut self) {
        self.applying_remote = false;
    }

    pub fn is_applying_remote(&self) -> bool {
        self.applying_remote
    }

    /// Advance timers. Returns the IO actions due at `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        if self.body_debounce.fire(now_ms) {
            if self.send_armed {
                self.send_armed = false;
                actions.push(SyncAction::SendSync {
                    content: self.dirty.latest().to_string(),
                });
            }
            if let Some(content) = self.dirty.begin_save() {
                actions.push(SyncAction::Persist { content });
            }
        }

        if self.title_debounce.fire(now_ms) {
            if let Some(title) = self.pending_title.take() {
                actions.push(SyncAction::PersistTitle { title });
            }
        }

        if self.recheck.fire(now_ms) {
            if let Some(content) = self.dirty.begin_save() {
                debug!("Periodic re-check found unsaved content");
                actions.push(SyncAction::Persist { content });
            }
        }

        if self.slow_flush.fire(now_ms) {
            if let Some(content) = self.dirty.begin_flush() {
                actions.push(SyncAction::Persist { content });
            }
        }

        actions
    }

    /// Unconditional flush: persist anything not yet confirmed, regardless
    /// of debounce state. Called on tab hide, unload, and shutdown.
    pub fn flush(&mut self) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        if let Some(content) = self.dirty.begin_flush() {
            actions.push(SyncAction::Persist { content });
        }
        if let Some(title) = self.pending_title.take() {
            self.title_debounce.cancel();
            actions.push(SyncAction::PersistTitle { title });
        }
        actions
    }

    /// Report the outcome of a `Persist` action.
    pub fn persist_completed(&mut self, payload: &str, ok: bool) {
        if !ok {
            warn!("Persist failed; will retry on the next cycle");
        }
        self.dirty.complete_save(payload, ok);
    }
}
