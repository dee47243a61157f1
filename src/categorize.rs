// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! AI categorization of single attachments

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, error, info};

use crate::ai::{Categorization, CategorizeRequest, FilenameAi, PrunedMeta};
use crate::db::Database;
use crate::library::{LibraryPaths, RecordStore};
use crate::Result;

/// Taxonomy that AI categories are stored under
pub const CATEGORY_TAXONOMY: &str = "media_category";

pub struct Categorizer<'a> {
    ai: &'a dyn FilenameAi,
    db: &'a Database,
    paths: LibraryPaths,
    enabled: bool,
    inline_images: bool,
}

impl<'a> Categorizer<'a> {
    pub fn new(ai: &'a dyn FilenameAi, db: &'a Database, paths: LibraryPaths) -> Self {
        Self { ai, db, paths, enabled: true, inline_images: false }
    }

    /// Turn the categorizer into a logging no-op when no endpoint is configured
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn inline_images(mut self, inline: bool) -> Self {
        self.inline_images = inline;
        self
    }

    /// Build the request for an attachment.
    ///
    /// `None` when the attachment has no file or no asset metadata.
    pub fn build_request(&self, id: i64) -> Result<Option<CategorizeRequest>> {
        let Some(stored) = self.db.attached_file(id)? else {
            return Ok(None);
        };
        let Some(meta) = self.db.attachment_metadata(id)?.filter(|m| m.is_object()) else {
            return Ok(None);
        };

        let path = self.paths.resolve(&stored);
        let url = self.paths.url_for(&self.paths.relative(&path));
        let file_name = url.rsplit('/').next().unwrap_or_default().to_string();

        let file_size = std::fs::metadata(&path).ok().map(|m| m.len());
        let image = if self.inline_images && file_size.is_some() {
            Some(general_purpose::STANDARD.encode(std::fs::read(&path)?))
        } else {
            None
        };

        Ok(Some(CategorizeRequest {
            file: url,
            meta: PrunedMeta {
                file_name,
                width: meta["width"].as_u64().unwrap_or(0),
                height: meta["height"].as_u64().unwrap_or(0),
                file_size,
            },
            image,
        }))
    }

    /// Categorize one attachment and store the result.
    ///
    /// Returns `Ok(None)` when there was nothing to send.
    pub async fn process_attachment(&self, id: i64) -> Result<Option<Categorization>> {
        if !self.enabled {
            error!("AI categorizer endpoint not configured, skipping attachment {}", id);
            return Ok(None);
        }
        let Some(request) = self.build_request(id)? else {
            debug!("Attachment {} has no file or metadata, skipping", id);
            return Ok(None);
        };

        let result = self.ai.categorize(&request).await?;
        self.apply(id, &result)?;
        Ok(Some(result))
    }

    fn apply(&self, id: i64, result: &Categorization) -> Result<()> {
        let categories: Vec<String> = result
            .categories
            .iter()
            .map(|c| clean_text(c))
            .filter(|c| !c.is_empty())
            .collect();
        if !categories.is_empty() {
            self.db.set_terms(id, CATEGORY_TAXONOMY, &categories)?;
        }

        if let Some(title) = result.title.as_deref().map(clean_text).filter(|t| !t.is_empty()) {
            self.db.update_title(id, &title)?;
        }

        info!("Categorized attachment {}: {} categories", id, categories.len());
        Ok(())
    }
}

/// Single-line text with tags and control characters removed
fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
