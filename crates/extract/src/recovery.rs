//! Layered recovery of JSON from raw LLM output.
//!
//! Layers run in order and the first one that yields valid JSON wins:
//! direct parse, code-fence stripping, the earliest balanced `[...]` or
//! `{...}` slice, syntax repair (unquoted keys, trailing commas), and a final lenient pass
//! (single quotes, Python literals, line comments).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern")
});
static UNQUOTED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\{,]\s*)([A-Za-z_][A-Za-z0-9_\-]*)(\s*):").expect("unquoted key pattern")
});
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[\}\]])").expect("trailing comma pattern"));
static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'((?:[^'\\]|\\.)*)'(\s*[:,\}\]])").expect("single quote pattern")
});
static PY_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(True|False|None)\b").expect("literal pattern"));
static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*//.*$").expect("comment pattern"));

/// Which recovery layer produced the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLayer {
    Direct,
    FenceStripped,
    Slice,
    Repaired,
    Lenient,
}

/// Recover a JSON value from `raw`, or `None` if every layer fails.
pub fn recover_json(raw: &str) -> Option<(Value, RecoveryLayer)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(value) = parse(trimmed) {
        return Some((value, RecoveryLayer::Direct));
    }

    let body = strip_code_fence(trimmed);
    if let Some(body) = body {
        if let Some(value) = parse(body) {
            return Some((value, RecoveryLayer::FenceStripped));
        }
    }
    let body = body.unwrap_or(trimmed);

    // Arrays and objects in order of appearance, so prose around an
    // `{"entities": [..], "relations": [..]}` object keeps the whole object
    let mut spans = balanced_spans(body, '[', ']');
    spans.extend(balanced_spans(body, '{', '}'));
    spans.sort_by_key(|(start, _)| *start);
    let mut slices: Vec<(usize, &str)> = Vec::new();
    for (start, slice) in spans {
        let nested = slices
            .last()
            .is_some_and(|(outer, outer_slice)| start < outer + outer_slice.len());
        if !nested {
            slices.push((start, slice));
        }
    }
    if let Some(value) = slices.iter().find_map(|(_, slice)| parse(slice)) {
        return Some((value, RecoveryLayer::Slice));
    }

    let mut candidates: Vec<&str> = slices.first().map(|(_, slice)| *slice).into_iter().collect();
    candidates.push(body);

    if let Some(value) = candidates.iter().find_map(|c| parse(&repair(c))) {
        return Some((value, RecoveryLayer::Repaired));
    }

    candidates
        .iter()
        .find_map(|c| parse(&repair(&lenient(c))))
        .map(|value| (value, RecoveryLayer::Lenient))
}

fn parse(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Body of the first fenced block, if the text contains one.
pub fn strip_code_fence(text: &str) -> Option<&str> {
    FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Top-level balanced `open ... close` substrings, in order of appearance.
/// Brackets inside double-quoted strings are ignored.
pub fn balanced_slices(text: &str, open: char, close: char) -> Vec<&str> {
    balanced_spans(text, open, close)
        .into_iter()
        .map(|(_, slice)| slice)
        .collect()
}

/// Like [`balanced_slices`], paired with each slice's byte offset in `text`.
fn balanced_spans(text: &str, open: char, close: char) -> Vec<(usize, &str)> {
    let mut slices = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            c if c == open => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            c if c == close && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        slices.push((begin, &text[begin..idx + close.len_utf8()]));
                    }
                }
            }
            _ => {}
        }
    }

    slices
}

/// Quote bare object keys and drop trailing commas.
pub fn repair(text: &str) -> String {
    let quoted = UNQUOTED_KEY.replace_all(text, "$1\"$2\"$3:");
    TRAILING_COMMA.replace_all(&quoted, "$1").into_owned()
}

fn lenient(text: &str) -> String {
    let text = LINE_COMMENT.replace_all(text, "");
    let text = SINGLE_QUOTED.replace_all(&text, "\"$1\"$2");
    PY_LITERAL
        .replace_all(&text, |caps: &regex::Captures| match &caps[1] {
            "True" => "true",
            "False" => "false",
            _ => "null",
        })
        .into_owned()
}
