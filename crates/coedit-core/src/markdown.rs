//! Lightweight markdown conversion for accepted AI responses.
//!
//! AI text streams into the document as plain text; only when the user
//! accepts the response is the final text converted to structured blocks.
//! The dialect is deliberately small: headings `#`..`####`, `**bold**`,
//! `*italic*`, `` `code` ``, and newlines as block breaks.

use crate::content::{Block, BlockKind, Marks, Span};

/// Convert markdown text to blocks, one block per line.
pub fn to_blocks(input: &str) -> Vec<Block> {
    let lines: Vec<&str> = input.split('\n').collect();
    lines.iter().map(|line| line_to_block(line)).collect()
}

fn line_to_block(line: &str) -> Block {
    for (prefix, level) in [("#### ", 4u8), ("### ", 3), ("## ", 2), ("# ", 1)] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Block {
                kind: BlockKind::Heading(level),
                spans: parse_inline(rest),
            };
        }
    }

    Block {
        kind: BlockKind::Paragraph,
        spans: parse_inline(line),
    }
}

/// Parse inline marks out of a single line.
///
/// Bold is matched before italic so `**x**` is not read as two italics.
/// Unterminated delimiters are kept as literal text.
fn parse_inline(text: &str) -> Vec<Span> {
    let chars: Vec<char> = text.chars().collect();
    let mut spans = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '`' {
            if let Some(close) = find_char(&chars, i + 1, '`') {
                if close > i + 1 {
                    flush_plain(&mut spans, &mut plain);
                    spans.push(Span::marked(
                        collect(&chars, i + 1, close),
                        Marks {
                            code: true,
                            ..Marks::none()
                        },
                    ));
                    i = close + 1;
                    continue;
                }
            }
        } else if chars[i] == '*' && i + 1 < chars.len() && chars[i + 1] == '*' {
            if let Some(close) = find_pair(&chars, i + 2) {
                if close > i + 2 {
                    flush_plain(&mut spans, &mut plain);
                    spans.push(Span::marked(
                        collect(&chars, i + 2, close),
                        Marks {
                            bold: true,
                            ..Marks::none()
                        },
                    ));
                    i = close + 2;
                    continue;
                }
            }
        } else if chars[i] == '*' {
            if let Some(close) = find_char(&chars, i + 1, '*') {
                if close > i + 1 {
                    flush_plain(&mut spans, &mut plain);
                    spans.push(Span::marked(
                        collect(&chars, i + 1, close),
                        Marks {
                            italic: true,
                            ..Marks::none()
                        },
                    ));
                    i = close + 1;
                    continue;
                }
            }
        }

        plain.push(chars[i]);
        i += 1;
    }

    flush_plain(&mut spans, &mut plain);
    spans
}

fn flush_plain(spans: &mut Vec<Span>, plain: &mut String) {
    if !plain.is_empty() {
        spans.push(Span::plain(std::mem::take(plain)));
    }
}

fn collect(chars: &[char], start: usize, end: usize) -> String {
    chars[start..end].iter().collect()
}

fn find_char(chars: &[char], from: usize, needle: char) -> Option<usize> {
    (from..chars.len()).find(|&i| chars[i] == needle)
}

fn find_pair(chars: &[char], from: usize) -> Option<usize> {
    (from..chars.len().saturating_sub(1)).find(|&i| chars[i] == '*' && chars[i + 1] == '*')
}
