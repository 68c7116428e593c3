//! Structured document content: the block tree behind the editor's JSON shape.
//!
//! Documents travel as an opaque serialized string. This module detects the
//! structured shape (`{"type": "doc", ...}`) and converts it to a block tree;
//! anything else (legacy plain text, truncated JSON) falls back to a single
//! paragraph wrapping the raw text, so unparseable content never crashes a
//! session.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Not a structured document")]
    NotADocument,
}

pub type Result<T> = std::result::Result<T, ContentError>;

/// Inline formatting flags on a text span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marks {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
}

impl Marks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_plain(&self) -> bool {
        !self.bold && !self.italic && !self.code
    }
}

/// A run of text with uniform formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub marks: Marks,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: Marks::none(),
        }
    }

    pub fn marked(text: impl Into<String>, marks: Marks) -> Self {
        Self {
            text: text.into(),
            marks,
        }
    }

    /// Length in chars (document positions are char offsets).
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Block-level node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    /// Heading with level 1..=6.
    Heading(u8),
}

/// A block-level node: one paragraph or heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub spans: Vec<Span>,
}

impl Block {
    pub fn paragraph(text: impl Into<String>) -> Self {
        let text = text.into();
        let spans = if text.is_empty() {
            Vec::new()
        } else {
            vec![Span::plain(text)]
        };
        Self {
            kind: BlockKind::Paragraph,
            spans,
        }
    }

    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        let text = text.into();
        let spans = if text.is_empty() {
            Vec::new()
        } else {
            vec![Span::plain(text)]
        };
        Self {
            kind: BlockKind::Heading(level),
            spans,
        }
    }

    /// Plain text of this block (marks stripped).
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    /// Length of the block's plain text in chars.
    pub fn char_len(&self) -> usize {
        self.spans.iter().map(Span::char_len).sum()
    }
}

/// Strictly parse serialized content as a structured document.
///
/// Returns an error when the payload is not valid JSON or the root node is
/// not `{"type": "doc", ...}`. Remote snapshots that fail this check are
/// dropped by the coordinator.
pub fn parse_structured(raw: &str) -> Result<Vec<Block>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ContentError::Json(e.to_string()))?;
    blocks_from_value(&value).ok_or(ContentError::NotADocument)
}

/// Parse serialized content, falling back to a single-paragraph wrapper.
///
/// Used when loading stored documents: legacy plain-text content (or content
/// that fails to parse) becomes one paragraph holding the raw text.
pub fn parse_or_wrap(raw: &str) -> Vec<Block> {
    if raw.is_empty() {
        return vec![Block::paragraph("")];
    }
    parse_structured(raw).unwrap_or_else(|_| vec![Block::paragraph(raw)])
}

/// Serialize blocks to the editor's JSON document shape.
pub fn to_document_json(blocks: &[Block]) -> String {
    document_value(blocks).to_string()
}

/// Build the JSON document tree for a slice of blocks.
pub fn document_value(blocks: &[Block]) -> Value {
    let content: Vec<Value> = blocks.iter().map(block_value).collect();
    json!({ "type": "doc", "content": content })
}

/// Plain text of a block sequence; blocks are separated by newlines.
pub fn plain_text(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::plain_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn block_value(block: &Block) -> Value {
    let content: Vec<Value> = block.spans.iter().map(span_value).collect();
    match block.kind {
        BlockKind::Paragraph => json!({ "type": "paragraph", "content": content }),
        BlockKind::Heading(level) => json!({
            "type": "heading",
            "attrs": { "level": level },
            "content": content,
        }),
    }
}

fn span_value(span: &Span) -> Value {
    let mut marks = Vec::new();
    if span.marks.bold {
        marks.push(json!({ "type": "bold" }));
    }
    if span.marks.italic {
        marks.push(json!({ "type": "italic" }));
    }
    if span.marks.code {
        marks.push(json!({ "type": "code" }));
    }

    if marks.is_empty() {
        json!({ "type": "text", "text": span.text.clone() })
    } else {
        json!({ "type": "text", "text": span.text.clone(), "marks": marks })
    }
}

fn blocks_from_value(value: &Value) -> Option<Vec<Block>> {
    if value.get("type").and_then(Value::as_str) != Some("doc") {
        return None;
    }

    let nodes = match value.get("content").and_then(Value::as_array) {
        Some(nodes) => nodes,
        None => return Some(Vec::new()),
    };

    Some(nodes.iter().map(block_from_value).collect())
}

fn block_from_value(node: &Value) -> Block {
    let kind = match node.get("type").and_then(Value::as_str) {
        Some("heading") => {
            let level = node
                .get("attrs")
                .and_then(|a| a.get("level"))
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .clamp(1, 6) as u8;
            BlockKind::Heading(level)
        }
        // Unknown block kinds degrade to paragraphs carrying their text.
        _ => BlockKind::Paragraph,
    };

    let spans = match node.get("content").and_then(Value::as_array) {
        Some(children) => children.iter().filter_map(span_from_value).collect(),
        None => Vec::new(),
    };

    Block { kind, spans }
}

fn span_from_value(node: &Value) -> Option<Span> {
    let text = match node.get("type").and_then(Value::as_str) {
        Some("text") => node.get("text").and_then(Value::as_str)?.to_string(),
        // Nested inline nodes: keep their plain text so nothing is lost.
        _ => collect_text(node),
    };

    if text.is_empty() {
        return None;
    }

    let mut marks = Marks::none();
    if let Some(list) = node.get("marks").and_then(Value::as_array) {
        for mark in list {
            match mark.get("type").and_then(Value::as_str) {
                Some("bold") => marks.bold = true,
                Some("italic") => marks.italic = true,
                Some("code") => marks.code = true,
                _ => {}
            }
        }
    }

    Some(Span::marked(text, marks))
}

fn collect_text(node: &Value) -> String {
    let mut out = String::new();
    if let Some(text) = node.get("text").and_then(Value::as_str) {
        out.push_str(text);
    }
    if let Some(children) = node.get("content").and_then(Value::as_array) {
        for child in children {
            out.push_str(&collect_text(child));
        }
    }
    out
}
