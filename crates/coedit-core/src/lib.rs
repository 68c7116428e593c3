//! coedit-core: Synchronization engine for a collaborative document editor.
//!
//! This crate provides the core functionality for:
//! - Deciding when local edits are sent and persisted (SyncCoordinator)
//! - Merging streamed AI responses into a live document (StreamInsertionController)
//! - The snapshot wire protocol shared with the relay server
//! - EditorModel, DocumentStore, and Assistant trait abstractions
//!
//! All timing is explicit (`now_ms` parameters), so the engine is
//! deterministic under test; the IO shell lives in coedit-client.

pub mod assist;
pub mod content;
pub mod coordinator;
pub mod dirty;
pub mod document;
pub mod editor;
pub mod markdown;
pub mod protocol;
pub mod schedule;
pub mod store;
pub mod stream;

pub use assist::{AssistError, AssistRequest, Assistant, ScriptedAssistant};
pub use content::{Block, BlockKind, ContentError, Marks, Span};
pub use coordinator::{RemoteDecision, SyncAction, SyncCoordinator, SyncTiming};
pub use dirty::DirtyState;
pub use document::{Document, DocumentPatch, NewDocument};
pub use editor::{EditorModel, InMemoryEditor, Insertion};
pub use protocol::{ConnectionState, OpKind, Operation};
pub use store::{DocumentStore, InMemoryStore, StoreError};
pub use stream::{StreamInsertionController, StreamRange, StreamState};
