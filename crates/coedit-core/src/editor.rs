//! EditorModel trait abstraction over the rich-text editing surface.
//!
//! The real editing surface (block editor, keyboard handling, rendering) is
//! an external collaborator. The sync engine only needs the operations below.
//! `InMemoryEditor` is the reference implementation used in tests and by the
//! headless client.
//!
//! Positions are char offsets into the document's plain-text projection,
//! where consecutive blocks are separated by a single newline.

use crate::content::{self, Block, BlockKind, Span};

/// Content inserted into a range: raw text (streaming) or structured blocks
/// (accepted responses).
#[derive(Debug, Clone)]
pub enum Insertion {
    Text(String),
    Blocks(Vec<Block>),
}

/// The editing-surface contract consumed by the sync engine.
pub trait EditorModel {
    /// Serialized document content (the editor's JSON tree).
    fn content(&self) -> String;

    /// Plain text of the whole document, blocks joined by newlines.
    fn plain_text(&self) -> String;

    /// Total plain-text length in chars.
    fn char_len(&self) -> usize;

    /// Replace the whole document.
    fn replace_all(&mut self, blocks: Vec<Block>);

    /// Insert plain text at a position. Newlines split blocks.
    fn insert_text(&mut self, position: usize, text: &str);

    /// Replace the half-open range `[start, end)` in one atomic edit.
    fn replace_range(&mut self, start: usize, end: usize, insertion: Insertion);

    /// Current selection as (from, to); collapsed when equal.
    fn selection(&self) -> (usize, usize);

    fn set_selection(&mut self, from: usize, to: usize);

    /// Change notification: returns the serialized content if the document
    /// was mutated since the last poll. Drains the flag.
    fn poll_change(&mut self) -> Option<String>;
}

/// In-memory editor for tests and headless use.
pub struct InMemoryEditor {
    blocks: Vec<Block>,
    selection: (usize, usize),
    changed: bool,
}

impl InMemoryEditor {
    /// Create an editor holding one empty paragraph.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::paragraph("")],
            selection: (0, 0),
            changed: false,
        }
    }

    /// Create an editor from serialized content, with plain-text fallback.
    pub fn from_serialized(raw: &str) -> Self {
        let mut editor = Self::new();
        editor.blocks = content::parse_or_wrap(raw);
        editor
    }

    /// Direct access to the block tree (test inspection).
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Map a char position to (block index, offset within block).
    ///
    /// A position on the separator between blocks maps to the end of the
    /// earlier block.
    fn locate(&self, position: usize) -> (usize, usize) {
        let mut offset = 0;
        for (i, block) in self.blocks.iter().enumerate() {
            let len = block.char_len();
            if position <= offset + len {
                return (i, position - offset);
            }
            offset += len + 1;
        }
        let last = self.blocks.len() - 1;
        (last, self.blocks[last].char_len())
    }

    fn insert_single_line(&mut self, block_idx: usize, offset: usize, text: &str) {
        insert_into_spans(&mut self.blocks[block_idx].spans, offset, text);
    }

    fn insert_multi_line(&mut self, block_idx: usize, offset: usize, segments: &[&str]) {
        let block = &self.blocks[block_idx];
        let (mut head, tail) = split_spans(&block.spans, offset);

        if !segments[0].is_empty() {
            head.push(Span::plain(segments[0]));
        }
        let head_block = Block {
            kind: block.kind,
            spans: head,
        };

        let mut replacement = vec![head_block];
        for segment in &segments[1..segments.len() - 1] {
            replacement.push(Block::paragraph(*segment));
        }

        let last = segments[segments.len() - 1];
        let mut tail_spans = Vec::new();
        if !last.is_empty() {
            tail_spans.push(Span::plain(last));
        }
        tail_spans.extend(tail);
        replacement.push(Block {
            kind: BlockKind::Paragraph,
            spans: tail_spans,
        });

        self.blocks.splice(block_idx..=block_idx, replacement);
    }

    fn delete_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let (bi, so) = self.locate(start);
        let (ei, eo) = self.locate(end);

        if bi == ei {
            self.blocks[bi].spans = remove_span_range(&self.blocks[bi].spans, so, eo);
            return;
        }

        // The separator between bi and ei is inside the range, so the
        // surviving halves merge into one block.
        let (head, _) = split_spans(&self.blocks[bi].spans, so);
        let (_, tail) = split_spans(&self.blocks[ei].spans, eo);
        let mut spans = head;
        spans.extend(tail);
        let merged = Block {
            kind: self.blocks[bi].kind,
            spans,
        };
        self.blocks.splice(bi..=ei, [merged]);
    }

    fn insert_blocks(&mut self, position: usize, new_blocks: Vec<Block>) {
        if new_blocks.is_empty() {
            return;
        }
        let (bi, offset) = self.locate(position);
        let len = self.blocks[bi].char_len();

        if offset == 0 && len == 0 {
            // Empty block: the inserted blocks take its place.
            self.blocks.splice(bi..=bi, new_blocks);
        } else if offset == 0 {
            self.blocks.splice(bi..bi, new_blocks);
        } else if offset == len {
            self.blocks.splice(bi + 1..bi + 1, new_blocks);
        } else {
            let block = &self.blocks[bi];
            let (head, tail) = split_spans(&block.spans, offset);
            let mut replacement = vec![Block {
                kind: block.kind,
                spans: head,
            }];
            replacement.extend(new_blocks);
            replacement.push(Block {
                kind: BlockKind::Paragraph,
                spans: tail,
            });
            self.blocks.splice(bi..=bi, replacement);
        }
    }

    fn clamp(&self, position: usize) -> usize {
        position.min(self.char_len())
    }
}

impl Default for InMemoryEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorModel for InMemoryEditor {
    fn content(&self) -> String {
        content::to_document_json(&self.blocks)
    }

    fn plain_text(&self) -> String {
        content::plain_text(&self.blocks)
    }

    fn char_len(&self) -> usize {
        let text_len: usize = self.blocks.iter().map(Block::char_len).sum();
        text_len + self.blocks.len() - 1
    }

    fn replace_all(&mut self, blocks: Vec<Block>) {
        self.blocks = if blocks.is_empty() {
            vec![Block::paragraph("")]
        } else {
            blocks
        };
        let len = self.char_len();
        self.selection = (self.selection.0.min(len), self.selection.1.min(len));
        self.changed = true;
    }

    fn insert_text(&mut self, position: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        let position = self.clamp(position);
        let (bi, offset) = self.locate(position);

        let segments: Vec<&str> = text.split('\n').collect();
        if segments.len() == 1 {
            self.insert_single_line(bi, offset, text);
        } else {
            self.insert_multi_line(bi, offset, &segments);
        }
        self.changed = true;
    }

    fn replace_range(&mut self, start: usize, end: usize, insertion: Insertion) {
        let start = self.clamp(start);
        let end = self.clamp(end).max(start);

        self.delete_range(start, end);
        match insertion {
            Insertion::Text(text) => {
                if !text.is_empty() {
                    self.insert_text(start, &text);
                }
            }
            Insertion::Blocks(blocks) => self.insert_blocks(start, blocks),
        }
        self.changed = true;
    }

    fn selection(&self) -> (usize, usize) {
        let len = self.char_len();
        (self.selection.0.min(len), self.selection.1.min(len))
    }

    fn set_selection(&mut self, from: usize, to: usize) {
        let from = self.clamp(from);
        let to = self.clamp(to).max(from);
        self.selection = (from, to);
    }

    fn poll_change(&mut self) -> Option<String> {
        if self.changed {
            self.changed = false;
            Some(self.content())
        } else {
            None
        }
    }
}

/// Insert text into a span list at a char offset, inheriting the marks of
/// the span it lands in.
fn insert_into_spans(spans: &mut Vec<Span>, offset: usize, text: &str) {
    if text.is_empty() {
        return;
    }
    if spans.is_empty() {
        spans.push(Span::plain(text));
        return;
    }

    let mut acc = 0;
    for span in spans.iter_mut() {
        let len = span.char_len();
        if offset <= acc + len {
            let byte = char_to_byte(&span.text, offset - acc);
            span.text.insert_str(byte, text);
            return;
        }
        acc += len;
    }

    if let Some(last) = spans.last_mut() {
        last.text.push_str(text);
    }
}

/// Split a span list at a char offset. Empty halves of a split span are
/// dropped.
fn split_spans(spans: &[Span], offset: usize) -> (Vec<Span>, Vec<Span>) {
    let mut head = Vec::new();
    let mut tail = Vec::new();
    let mut acc = 0;

    for span in spans {
        let len = span.char_len();
        if acc + len <= offset {
            head.push(span.clone());
        } else if acc >= offset {
            tail.push(span.clone());
        } else {
            let local = offset - acc;
            let byte = char_to_byte(&span.text, local);
            let (left, right) = span.text.split_at(byte);
            if !left.is_empty() {
                head.push(Span::marked(left, span.marks));
            }
            if !right.is_empty() {
                tail.push(Span::marked(right, span.marks));
            }
        }
        acc += len;
    }

    (head, tail)
}

/// Remove the char range `[start, end)` from a span list.
fn remove_span_range(spans: &[Span], start: usize, end: usize) -> Vec<Span> {
    let (head, rest) = split_spans(spans, start);
    let (_, tail) = split_spans(&rest, end - start);
    let mut out = head;
    out.extend(tail);
    out
}

fn char_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}
