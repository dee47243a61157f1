// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filename templates
//!
//! A template is plain text with `{token}` placeholders, e.g.
//! `{description}-{date}`. Placeholders are replaced in a single scan, so a
//! value that itself looks like `{date}` is kept literally. Unknown tokens
//! are left as written and then stripped of their braces by sanitization.

use std::collections::HashMap;
use std::path::Path;

use crate::library::FileStore;
use crate::sanitize::sanitize_file_name;

pub const DEFAULT_TEMPLATE: &str = "{description}-{date}";

/// Stem used when a template renders to nothing
const EMPTY_STEM: &str = "file";

/// Replace every `{token}` and sanitize the result.
///
/// An extension in the template survives; an empty stem becomes `file`.
pub fn render(template: &str, tokens: &HashMap<String, String>) -> String {
    let out = substitute(template, tokens);

    let (stem, ext) = match out.rfind('.') {
        Some(idx) if idx + 1 < out.len() && out[idx + 1..].chars().all(|c| c.is_ascii_alphanumeric()) => {
            (&out[..idx], Some(&out[idx + 1..]))
        }
        _ => (out.as_str(), None),
    };

    let mut stem = sanitize_file_name(stem);
    if stem.is_empty() {
        stem = EMPTY_STEM.to_string();
    }
    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// One left-to-right pass; substituted values are never scanned again
fn substitute(template: &str, tokens: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}').map(|close| (close, tokens.get(&after[..close]))) {
            Some((close, Some(value))) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// [`render`], then make the name free in `dir`
pub fn generate_unique(
    template: &str,
    tokens: &HashMap<String, String>,
    files: &dyn FileStore,
    dir: &Path,
) -> String {
    files.unique_filename(dir, &render(template, tokens))
}
