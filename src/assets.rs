// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Derived-asset generation: resized image variants and attachment metadata

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::library::AssetGenerator;
use crate::sanitize::split_extension;
use crate::{RenamerError, Result};

/// A named resized variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSize {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Crop to exactly `width` x `height` instead of fitting inside
    pub crop: bool,
}

impl ImageSize {
    fn new(name: &str, width: u32, height: u32, crop: bool) -> Self {
        Self { name: name.to_string(), width, height, crop }
    }
}

/// Generates resized variants next to the source image
pub struct ImageAssetGenerator {
    sizes: Vec<ImageSize>,
}

impl ImageAssetGenerator {
    pub fn new(sizes: Vec<ImageSize>) -> Self {
        Self { sizes }
    }

    fn render(&self, img: &DynamicImage, size: &ImageSize, ext: &str) -> DynamicImage {
        let resized = if size.crop {
            img.resize_to_fill(size.width, size.height, FilterType::Triangle)
        } else {
            img.resize(size.width, size.height, FilterType::Triangle)
        };

        // JPEG has no alpha channel
        if matches!(ext, "jpg" | "jpeg") {
            DynamicImage::ImageRgb8(resized.to_rgb8())
        } else {
            resized
        }
    }
}

impl Default for ImageAssetGenerator {
    fn default() -> Self {
        Self::new(vec![
            ImageSize::new("thumbnail", 150, 150, true),
            ImageSize::new("medium", 300, 300, false),
            ImageSize::new("large", 1024, 1024, false),
        ])
    }
}

/// MIME type guessed from a file extension
pub fn mime_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "avif" => "image/avif",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "txt" => "text/plain",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

fn is_resizable(ext: &str) -> bool {
    matches!(ext, "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tif" | "tiff")
}

impl AssetGenerator for ImageAssetGenerator {
    fn generate(&self, id: i64, path: &Path) -> Result<serde_json::Value> {
        let filesize = std::fs::metadata(path)?.len();
        if filesize == 0 {
            return Err(RenamerError::AssetGeneration(format!(
                "Attachment {} has an empty file: {}",
                id,
                path.display()
            )));
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RenamerError::AssetGeneration(format!("Unusable path: {:?}", path)))?;
        let (stem, ext) = split_extension(file_name);
        let ext = ext.unwrap_or("").to_ascii_lowercase();

        if !is_resizable(&ext) {
            return Ok(serde_json::json!({
                "file": file_name,
                "filesize": filesize,
                "mime_type": mime_type(&ext),
            }));
        }

        let img = image::open(path)?;
        let (width, height) = img.dimensions();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut sizes = serde_json::Map::new();
        for size in &self.sizes {
            // Never upscale
            if size.width >= width && size.height >= height {
                continue;
            }
            let variant = self.render(&img, size, &ext);
            let (w, h) = variant.dimensions();
            let variant_name = format!("{}-{}x{}.{}", stem, w, h, ext);
            variant.save(dir.join(&variant_name))?;
            debug!("Generated {} variant {}", size.name, variant_name);

            sizes.insert(
                size.name.clone(),
                serde_json::json!({
                    "file": variant_name,
                    "width": w,
                    "height": h,
                    "mime_type": mime_type(&ext),
                }),
            );
        }

        info!("Generated {} derived sizes for attachment {}", sizes.len(), id);

        Ok(serde_json::json!({
            "width": width,
            "height": height,
            "file": file_name,
            "filesize": filesize,
            "mime_type": mime_type(&ext),
            "sizes": sizes,
        }))
    }
}
