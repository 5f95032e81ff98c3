use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::ImageFormat;
use sha2::{Digest, Sha256};

use crate::session::ImageBytes;

pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

const ALLOWED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::WebP,
];

/// An image handed to the chat, identified by its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    name: String,
    bytes: ImageBytes,
}

impl ImageUpload {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .filter(|value| !value.trim().is_empty())
            .with_context(|| format!("{} has no usable file name", path.display()))?;
        ensure_allowed_extension(&name)?;
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Self::from_bytes(name, bytes)
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let name = name.into();
        let bytes = bytes.into();
        ensure_allowed_extension(&name)?;
        if bytes.is_empty() {
            bail!("{name} is empty");
        }
        let sniffed = match image::guess_format(&bytes) {
            Ok(format) if ALLOWED_FORMATS.contains(&format) => format,
            _ => bail!("{name} is not a recognised image"),
        };
        if declared_format(&name) != Some(sniffed) {
            bail!("{name} contains {sniffed:?} data, which does not match its extension");
        }
        Ok(Self {
            name,
            bytes: Arc::from(bytes),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &ImageBytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

pub fn is_allowed_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            ALLOWED_IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

fn declared_format(name: &str) -> Option<ImageFormat> {
    Path::new(name)
        .extension()
        .and_then(ImageFormat::from_extension)
}

fn ensure_allowed_extension(name: &str) -> Result<()> {
    if !is_allowed_image_name(name) {
        bail!(
            "{name} is not a supported image type (expected one of: {})",
            ALLOWED_IMAGE_EXTENSIONS.join(", ")
        );
    }
    Ok(())
}
