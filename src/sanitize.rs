// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filename and slug sanitization
//!
//! Everything that arrives from a user or from the AI endpoint passes through
//! [`sanitize_file_name`] before it touches the file system. The policy:
//!
//! * path separators (`/`, `\`) and the characters
//!   `? [ ] : ; = < > + & " ' $ # * ( ) | ~ ` ! { } % , ^` are removed,
//!   as are ASCII control characters and NUL;
//! * runs of whitespace become a single `-`, and runs of `-` collapse;
//! * leading and trailing `.`, `-` and `_` are trimmed, so a name can never
//!   be `.` or `..` or start a hidden file;
//! * the result never contains a directory component.
//!
//! Letters outside ASCII are kept. Case is preserved.

const SPECIAL_CHARS: &[char] = &[
    '?', '[', ']', '/', '\\', '=', '<', '>', ':', ';', ',', '\'', '"', '&', '$', '#', '*', '(',
    ')', '|', '~', '`', '!', '{', '}', '%', '+', '^',
];

/// Sanitize an untrusted string into a safe single-component filename.
///
/// May return an empty string when nothing usable is left.
pub fn sanitize_file_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for c in raw.chars() {
        if c.is_control() || SPECIAL_CHARS.contains(&c) {
            continue;
        }
        if c.is_whitespace() || c == '-' {
            pending_dash = true;
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.push(c);
    }

    // Collapse any "..": a dotted run can never stay between components
    while out.contains("..") {
        out = out.replace("..", ".");
    }

    out.trim_matches(|c| c == '.' || c == '-' || c == '_').to_string()
}

/// Build a URL slug: lowercase ASCII alphanumerics separated by single dashes.
pub fn sanitize_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_alphanumeric() {
            // Non-ASCII letters have no safe slug form; treat them as separators
            pending_dash = true;
        } else if c.is_whitespace() || c == '-' || c == '_' || c == '.' {
            pending_dash = true;
        }
    }

    slug
}

/// Split a filename into `(stem, extension)`; the extension excludes the dot.
pub fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < filename.len() => {
            (&filename[..idx], Some(&filename[idx + 1..]))
        }
        _ => (filename, None),
    }
}

/// `name` without a trailing `.<ext>`, matched ASCII case-insensitively.
///
/// Works on bytes, so names whose lowercase form has a different length
/// (`\u{212A}` KELVIN SIGN lowercases to `k`) are left alone.
pub fn strip_extension_suffix<'a>(name: &'a str, ext: &str) -> &'a str {
    let Some(cut) = name.len().checked_sub(ext.len() + 1) else {
        return name;
    };
    match (name.get(..cut), name.get(cut..)) {
        (Some(stem), Some(tail)) if tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(ext) => stem,
        _ => name,
    }
}
