//! Selector extraction and matcher cleanup.
//!
//! The engine recognizes two label matchers, the window selector
//! `chrono_timeframe="…"` and the command selector `_command="…"`, whether
//! they arrive as whole `match[]` entries or inline inside a `query`
//! expression. Extraction captures their values; cleanup removes the
//! fragments and repairs the surrounding punctuation so the upstream sees a
//! syntactically valid expression. Every other byte of the expression is
//! preserved.
//!
//! Fragments are located with a quote-aware scanner rather than regex
//! surgery: occurrences inside string values are never touched, and the
//! label name must sit on a word boundary (`my_command` does not match
//! `_command`).

use crate::model::{COMMAND_LABEL, TIMEFRAME_LABEL};
use crate::params::Params;

/// The two selector values recognized by the engine, as extracted from the
/// request. Values are raw strings at this point; interpretation (window
/// parse, override comparison) happens during planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub timeframe: Option<String>,
    pub command: Option<String>,
}

/// A located `label="value"` fragment.
struct Fragment {
    start: usize,
    end: usize,
    value_start: usize,
    value_end: usize,
}

/// Pull both selectors out of the request parameters.
///
/// Whole-value `match[]` entries take priority and are removed from the
/// multimap; inline occurrences in `query` are captured but left for
/// [`strip_label_from_param`] to remove.
pub fn extract_selectors(params: &mut Params) -> Selectors {
    let mut selectors = Selectors::default();

    for (label, slot) in [
        (TIMEFRAME_LABEL, &mut selectors.timeframe),
        (COMMAND_LABEL, &mut selectors.command),
    ] {
        let entries = params.get_all("match[]");
        if let Some(pos) = entries.iter().position(|e| is_whole_matcher(e, label)) {
            let mut entries = entries.to_vec();
            let entry = entries.remove(pos);
            let frags = fragments(&entry, label);
            let frag = &frags[0];
            *slot = Some(entry[frag.value_start..frag.value_end].to_string());
            params.set_all("match[]", entries);
        }
    }

    if selectors.timeframe.is_none() || selectors.command.is_none() {
        let query = params.get("query").unwrap_or("");
        if selectors.timeframe.is_none() {
            selectors.timeframe = find_inline(query, TIMEFRAME_LABEL);
        }
        if selectors.command.is_none() {
            selectors.command = find_inline(query, COMMAND_LABEL);
        }
    }

    selectors
}

/// First inline `label="value"` occurrence with a non-empty value.
pub fn find_inline(expr: &str, label: &str) -> Option<String> {
    fragments(expr, label)
        .into_iter()
        .find(|f| f.value_end > f.value_start)
        .map(|f| expr[f.value_start..f.value_end].to_string())
}

/// True when the entry is exactly one `label="value"` matcher with a
/// non-empty value and nothing else.
fn is_whole_matcher(entry: &str, label: &str) -> bool {
    let frags = fragments(entry, label);
    matches!(frags.first(),
        Some(f) if f.start == 0 && f.end == entry.len() && f.value_end > f.value_start)
}

/// Remove every `label="…"` fragment from all values stored under `key`,
/// repairing comma and brace artifacts afterwards.
pub fn strip_label_from_param(params: &mut Params, key: &str, label: &str) {
    let values = params.get_all(key);
    if values.is_empty() {
        return;
    }
    let stripped = values.iter().map(|v| strip_label_matcher(v, label)).collect();
    params.set_all(key, stripped);
}

/// Remove every `label="…"` fragment from a matcher expression.
///
/// Each removed fragment takes one immediately-preceding comma with it;
/// afterwards consecutive commas are collapsed, `{,` becomes `{`, and `,}`
/// becomes `}`. An empty `{}` is preserved. Applying the rewrite twice
/// yields the same string as applying it once.
pub fn strip_label_matcher(expr: &str, label: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut cursor = 0;
    for frag in fragments(expr, label) {
        let mut keep_until = frag.start;
        if expr[..keep_until].ends_with(',') {
            keep_until -= 1;
        }
        out.push_str(&expr[cursor..keep_until]);
        cursor = frag.end;
    }
    out.push_str(&expr[cursor..]);
    repair(&out)
}

/// Locate `label="value"` fragments outside quoted strings, with the label
/// name on a word boundary. Values run to the next unescaped quote.
fn fragments(expr: &str, label: &str) -> Vec<Fragment> {
    let bytes = expr.as_bytes();
    let mut frags = Vec::new();
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < bytes.len() {
        if in_string {
            match bytes[i] {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        if bytes[i] == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        if expr[i..].starts_with(label) && boundary_before(bytes, i) {
            let after = i + label.len();
            if expr[after..].starts_with("=\"") {
                if let Some(close) = find_closing_quote(bytes, after + 2) {
                    frags.push(Fragment {
                        start: i,
                        end: close + 1,
                        value_start: after + 2,
                        value_end: close,
                    });
                    i = close + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    frags
}

fn boundary_before(bytes: &[u8], i: usize) -> bool {
    i == 0 || !matches!(bytes[i - 1], b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b':')
}

fn find_closing_quote(bytes: &[u8], mut i: usize) -> Option<usize> {
    let mut escaped = false;
    while i < bytes.len() {
        match bytes[i] {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Repair punctuation artifacts left by fragment removal, outside quoted
/// strings only: collapse comma runs, drop a comma straight after `{` or
/// straight before `}`.
fn repair(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in expr.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' if out.ends_with(',') || out.ends_with('{') => {}
            '}' => {
                if out.ends_with(',') {
                    out.pop();
                }
                out.push('}');
            }
            _ => out.push(c),
        }
    }
    out
}
