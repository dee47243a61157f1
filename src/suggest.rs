// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filename suggestions for the preview step
//!
//! The AI service is asked first. When it fails or answers with nothing
//! usable the configured template is rendered locally, and as a last resort
//! the current name gets an `-optimized` suffix.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::ai::FilenameAi;
use crate::library::{Attachment, RecordStore};
use crate::rename::RenameRequest;
use crate::sanitize::{sanitize_file_name, sanitize_title, split_extension, strip_extension_suffix};
use crate::template;

/// Where a suggested name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    Ai,
    Template,
    Fallback,
}

/// A proposed new name for one attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: i64,
    pub current_filename: String,
    /// Sanitized stem, without extension
    pub suggested: String,
    pub source: SuggestionSource,
    /// AI failure that caused a fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Suggestion> for RenameRequest {
    fn from(s: Suggestion) -> Self {
        RenameRequest { id: s.id, old: s.current_filename, new: s.suggested }
    }
}

/// Template tokens for an attachment: `title`, `description`, `date`
pub fn tokens_for(attachment: &Attachment) -> HashMap<String, String> {
    let description = if attachment.caption.trim().is_empty() {
        attachment.title.clone()
    } else {
        attachment.caption.clone()
    };
    let date = attachment.date.get(..10).unwrap_or(&attachment.date).to_string();

    HashMap::from([
        ("title".to_string(), attachment.title.clone()),
        ("description".to_string(), description),
        ("date".to_string(), date),
    ])
}

pub fn build_prompt(tokens: &HashMap<String, String>, template: &str) -> String {
    let get = |key: &str| tokens.get(key).map(String::as_str).unwrap_or("");
    format!(
        "Generate an SEO-friendly filename for an image with title: {}, description: {}, date: {}. Use this template: {}.",
        get("title"),
        get("description"),
        get("date"),
        template
    )
}

/// Strip chat noise from a model reply, leaving a bare filename stem
pub fn clean_suggestion(raw: &str, extension: Option<&str>) -> String {
    let mut clean = raw.trim().replace(['\n', '\r'], " ");

    // Remove common chat prefixes ("Filename: ...")
    if let Some(idx) = clean.find(':') {
        if idx < 30 {
            clean = clean[idx + 1..].trim().to_string();
        }
    }

    clean = clean.trim().trim_matches(['"', '\'', '`']).trim().to_string();

    let stem = match extension {
        Some(ext) => strip_extension_suffix(&clean, ext),
        None => clean.as_str(),
    };

    sanitize_file_name(stem)
}

/// Suggestion engine over an AI client and the record store
pub struct Suggester<'a> {
    ai: &'a dyn FilenameAi,
    records: &'a dyn RecordStore,
    template: String,
}

impl<'a> Suggester<'a> {
    pub fn new(ai: &'a dyn FilenameAi, records: &'a dyn RecordStore, template: &str) -> Self {
        let template = if template.trim().is_empty() {
            template::DEFAULT_TEMPLATE.to_string()
        } else {
            template.to_string()
        };
        Self { ai, records, template }
    }

    /// Suggest names for `ids`; ids without a file or record are skipped
    pub async fn suggest(&self, ids: &[i64]) -> Vec<Suggestion> {
        let mut suggestions = Vec::with_capacity(ids.len());

        for &id in ids {
            let attachment = match self.records.attachment(id) {
                Ok(Some(a)) => a,
                Ok(None) => {
                    debug!("Skipping unknown attachment {}", id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to load attachment {}: {}", id, e);
                    continue;
                }
            };
            let Some(stored) = attachment.attached_file.as_deref().filter(|p| !p.is_empty()) else {
                debug!("Skipping attachment {} without a file", id);
                continue;
            };
            let current = stored.rsplit(['/', '\\']).next().unwrap_or(stored).to_string();
            suggestions.push(self.suggest_one(&attachment, current).await);
        }

        info!("Generated {} suggestions", suggestions.len());
        suggestions
    }

    async fn suggest_one(&self, attachment: &Attachment, current_filename: String) -> Suggestion {
        let tokens = tokens_for(attachment);
        let (stem, ext) = split_extension(&current_filename);
        let prompt = build_prompt(&tokens, &self.template);

        let error = match self.ai.suggest_filename(&prompt).await {
            Ok(reply) => {
                let suggested = clean_suggestion(&reply, ext);
                if !suggested.is_empty() {
                    return Suggestion {
                        id: attachment.id,
                        current_filename,
                        suggested,
                        source: SuggestionSource::Ai,
                        error: None,
                    };
                }
                "AI returned an empty filename".to_string()
            }
            Err(e) => {
                warn!("AI suggestion failed for attachment {}: {}", attachment.id, e);
                e.to_string()
            }
        };

        let rendered = template::render(&self.template, &tokens);
        let rendered = split_extension(&rendered).0.to_string();
        let (suggested, source) = if rendered.is_empty() || rendered == "file" {
            (format!("{}-optimized", sanitize_title(stem)), SuggestionSource::Fallback)
        } else {
            (rendered, SuggestionSource::Template)
        };

        Suggestion {
            id: attachment.id,
            current_filename,
            suggested,
            source,
            error: Some(error),
        }
    }
}
