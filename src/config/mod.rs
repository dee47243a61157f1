// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for the media renamer

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::library::LibraryPaths;
use crate::rename::RollbackPolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Media library locations
    pub library: LibraryConfig,

    /// AI engine configuration
    pub ai_engine: EngineConfig,

    /// Naming rules
    #[serde(default)]
    pub rules: RuleConfig,

    /// Background batch settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// History log settings
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LibraryConfig {
    /// Directory that attachment paths are stored relative to
    pub base_dir: PathBuf,
    /// Public URL that maps onto `base_dir`
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Filename suggestion endpoint
    pub url: String,
    /// Categorization endpoint; empty disables background categorization
    #[serde(default)]
    pub categorize_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Send image bytes inline (base64) with categorization requests
    #[serde(default)]
    pub inline_images: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    /// Filename template with `{description}`, `{date}`, `{title}` tokens
    #[serde(default = "default_template")]
    pub filename_template: String,
    /// Restore path, title and slug as well as the file on late failure
    #[serde(default)]
    pub full_rollback: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay before a dispatched batch becomes due
    #[serde(default = "default_dispatch_delay")]
    pub dispatch_delay_secs: i64,
    /// Worker poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
}

// Default value functions
fn default_timeout() -> u64 { 60 }
fn default_retries() -> u32 { 2 }
fn default_template() -> String { "{description}-{date}".to_string() }
fn default_batch_size() -> usize { 10 }
fn default_dispatch_delay() -> i64 { 5 }
fn default_poll_interval() -> u64 { 5 }
fn default_db_path() -> String { "media-library.db".to_string() }
fn default_history_path() -> String { "rename_history.jsonl".to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library: LibraryConfig {
                base_dir: PathBuf::from("./uploads"),
                base_url: "http://localhost/uploads".to_string(),
            },
            ai_engine: EngineConfig {
                url: "http://localhost:8000/generate-filename".to_string(),
                categorize_url: String::new(),
                api_key: String::new(),
                timeout_secs: default_timeout(),
                retries: default_retries(),
                inline_images: false,
            },
            rules: RuleConfig::default(),
            batch: BatchConfig::default(),
            database: DatabaseConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            filename_template: default_template(),
            full_rollback: false,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            dispatch_delay_secs: default_dispatch_delay(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::RenamerError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> crate::Result<()> {
        if self.library.base_url.trim().is_empty() {
            return Err(crate::RenamerError::Config("library.base_url is empty".to_string()));
        }
        if self.rules.filename_template.trim().is_empty() {
            return Err(crate::RenamerError::Config("rules.filename_template is empty".to_string()));
        }
        if self.batch.batch_size == 0 {
            return Err(crate::RenamerError::Config("batch.batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Library paths used to resolve stored attachment paths and URLs
    pub fn library_paths(&self) -> LibraryPaths {
        LibraryPaths::new(self.library.base_dir.clone(), &self.library.base_url)
    }

    pub fn rollback_policy(&self) -> RollbackPolicy {
        if self.rules.full_rollback {
            RollbackPolicy::Full
        } else {
            RollbackPolicy::FileOnly
        }
    }
}
