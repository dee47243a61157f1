// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Media Renamer: AI-assisted bulk renaming for a media library
//!
//! Renames attachment files on disk, keeps their records, derived assets and
//! every URL that points at them consistent, and categorizes attachments in
//! the background through a remote AI service.

pub mod ai;
pub mod assets;
pub mod categorize;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod library;
pub mod rename;
pub mod sanitize;
pub mod suggest;
pub mod template;

pub use config::AppConfig;
pub use error::{RenamerError, Result};
