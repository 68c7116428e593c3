//! Wire protocol for collaboration messages.
//!
//! A single JSON message shape is exchanged over the WebSocket. The server
//! is a pure broadcast relay keyed by document id: whatever one client sends
//! is rebroadcast verbatim to the other subscribers, with no transformation,
//! acknowledgement, or ordering guarantee beyond delivery order.
//!
//! Only `op: "sync"` carrying a full document snapshot is produced or
//! consumed today. `insert` and `delete` are reserved wire shape: they parse,
//! but applying them is a no-op.

use serde::{Deserialize, Serialize};

/// Observed state of the underlying transport. Mirrors the socket; the core
/// never sets it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Operation kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Reserved: positional insert. Never produced.
    Insert,
    /// Reserved: positional delete. Never produced.
    Delete,
    /// Full-document snapshot.
    Sync,
}

/// A collaboration message.
///
/// Sent as a JSON text frame. `position` is unused for `sync` and fixed at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub user_id: i64,
    pub op: OpKind,
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Operation {
    /// Build a sync operation carrying a full serialized snapshot.
    pub fn sync(user_id: i64, content: impl Into<String>) -> Self {
        Self {
            user_id,
            op: OpKind::Sync,
            position: 0,
            text: None,
            length: None,
            content: Some(content.into()),
        }
    }

    /// Serialize to a JSON string for a text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Operation serialization should not fail")
    }

    /// Try to parse an inbound frame.
    ///
    /// Returns None for malformed payloads; callers log and drop them
    /// without closing the connection.
    pub fn from_json(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}
