//! Lexical scanners used by the extraction strategies.
//!
//! Both scanners work on borrowed slices of the model output and never
//! allocate copies of the text they find.

const FENCE: &str = "```";

/// A fenced code block found in free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FencedBlock<'a> {
    /// Info string after the opening fence (`json`, `yaml`, or empty)
    pub label: &'a str,

    /// Block contents, trimmed
    pub body: &'a str,
}

impl FencedBlock<'_> {
    /// True when the block carries no language label.
    pub fn is_unlabeled(&self) -> bool {
        self.label.is_empty()
    }

    /// Case-insensitive label comparison.
    pub fn has_label(&self, candidates: &[&str]) -> bool {
        candidates
            .iter()
            .any(|c| self.label.eq_ignore_ascii_case(c))
    }
}

/// Collect every closed fenced block, in document order.
///
/// Fences are paired line by line: an opening fence is any line whose
/// trimmed form starts with three backticks, and the block closes at the
/// next such line. A fence that opens and closes on the same line
/// (```` ```json {"a": 1}``` ````) is accepted too. Unterminated blocks are
/// dropped.
pub(crate) fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut open: Option<(&str, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim();

        match open {
            None => {
                let Some(rest) = trimmed.strip_prefix(FENCE) else {
                    continue;
                };
                if let Some(end) = rest.find(FENCE) {
                    let (label, body) = split_inline_label(&rest[..end]);
                    blocks.push(FencedBlock {
                        label,
                        body: body.trim(),
                    });
                } else {
                    open = Some((info_label(rest), offset));
                }
            }
            Some((label, body_start)) => {
                if trimmed.starts_with(FENCE) {
                    blocks.push(FencedBlock {
                        label,
                        body: text[body_start..line_start].trim(),
                    });
                    open = None;
                }
            }
        }
    }

    blocks
}

/// First word of a fence info string, if it looks like a language tag.
fn info_label(info: &str) -> &str {
    let word = info.split_whitespace().next().unwrap_or("");
    if word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        word
    } else {
        ""
    }
}

/// Split `json {...}` into (`json`, `{...}`) for single-line fences.
fn split_inline_label(inner: &str) -> (&str, &str) {
    let inner = inner.trim_start();
    let tag_len = inner
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric())
        .map(|(i, _)| i)
        .unwrap_or(inner.len());
    inner.split_at(tag_len)
}

/// Every balanced top-level `{...}` span, in document order.
///
/// The matcher tracks string literals and escapes so braces inside JSON
/// strings do not affect depth. When an opening brace never closes, the
/// pairs closed inside it are still reported and scanning stops there,
/// so each byte is visited once.
pub(crate) fn top_level_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }

        match scan_braces(&bytes[i..]) {
            BraceScan::Closed(close) => {
                spans.push(&text[i..=i + close]);
                i += close + 1;
            }
            BraceScan::Unclosed(mut pairs) => {
                pairs.sort_unstable();
                let mut resume = 0;
                for (open, close) in pairs {
                    if open >= resume {
                        spans.push(&text[i + open..=i + close]);
                        resume = close + 1;
                    }
                }
                break;
            }
        }
    }

    spans
}

/// Outcome of scanning from an opening brace.
enum BraceScan {
    /// Byte index of the matching close
    Closed(usize),
    /// No match; holds the `(open, close)` pairs completed along the way
    Unclosed(Vec<(usize, usize)>),
}

/// Scan from the brace at `bytes[0]`.
///
/// Only ASCII bytes are inspected, so indices always fall on char
/// boundaries.
fn scan_braces(bytes: &[u8]) -> BraceScan {
    let mut open = Vec::new();
    let mut pairs = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => open.push(idx),
            b'}' => {
                if let Some(start) = open.pop() {
                    if open.is_empty() {
                        return BraceScan::Closed(idx);
                    }
                    pairs.push((start, idx));
                }
            }
            _ => {}
        }
    }

    BraceScan::Unclosed(pairs)
}
