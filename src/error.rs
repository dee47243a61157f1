// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for the media renamer

use thiserror::Error;

/// Result type alias for media renamer operations
pub type Result<T> = std::result::Result<T, RenamerError>;

/// Media renamer error types
#[derive(Error, Debug)]
pub enum RenamerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("AI service unavailable: {0}")]
    AiUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Attachment file not found: {0}")]
    NotFound(String),

    #[error("Invalid filename: {0}")]
    InvalidName(String),

    #[error("{0}")]
    MoveFailed(String),

    #[error("{0}")]
    AssetGeneration(String),
}
