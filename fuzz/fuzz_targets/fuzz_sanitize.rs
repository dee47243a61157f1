// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use media_renamer::sanitize::{sanitize_file_name, sanitize_title, split_extension};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let name = sanitize_file_name(input);
    assert!(!name.contains('/') && !name.contains('\\'));
    assert!(!name.contains(".."));
    assert!(!name.starts_with('.'));
    assert_eq!(sanitize_file_name(&name), name);

    let slug = sanitize_title(input);
    assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));

    let _ = split_extension(&name);
});
