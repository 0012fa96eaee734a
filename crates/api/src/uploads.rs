//! Content-addressed storage of uploaded input images.
//!
//! Each upload is written once to `<uploads_dir>/<sha256>.<ext>`. Uploading
//! the same bytes again yields the same path, so the path can take part in
//! a job's fingerprint.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use image::ImageFormat;

use sdapi_core::error::CoreError;
use sdapi_core::hashing::sha256_hex;

use crate::error::{AppError, AppResult};

/// Declared content types accepted for image fields.
const ACCEPTED_CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg"];

/// Check the bytes are a PNG or JPEG and return the file extension to use.
///
/// The declared content type, when present, must be one of the accepted
/// image types; the bytes themselves decide the extension.
pub fn sniff_image(bytes: &[u8], declared: Option<&str>) -> Result<&'static str, CoreError> {
    if let Some(declared) = declared {
        let base = declared.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if !ACCEPTED_CONTENT_TYPES.contains(&base.as_str()) {
            return Err(CoreError::UnsupportedMedia(format!(
                "'{declared}' is not an accepted image type"
            )));
        }
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok("png"),
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        Ok(other) => Err(CoreError::UnsupportedMedia(format!("{other:?} images are not accepted"))),
        Err(_) => Err(CoreError::UnsupportedMedia("Upload is not a PNG or JPEG image".into())),
    }
}

/// Persist an image upload and return its content-addressed path.
pub async fn store_image(dir: &Path, bytes: &[u8], declared: Option<&str>) -> AppResult<PathBuf> {
    let ext = sniff_image(bytes, declared)?;
    let path = dir.join(format!("{}.{ext}", sha256_hex(bytes)));

    let exists = tokio::fs::try_exists(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("stat {}: {e}", path.display())))?;
    if !exists {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::InternalError(format!("create {}: {e}", dir.display())))?;
        // Write under a temporary name so a concurrent reader never sees a
        // partial file at the final path.
        let partial = path.with_extension(format!("{ext}.part"));
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| AppError::InternalError(format!("write {}: {e}", partial.display())))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| AppError::InternalError(format!("rename {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Upload stored");
    }
    Ok(path)
}

/// Read a multipart file field and store it.
pub async fn store_field(dir: &Path, field: Field<'_>) -> AppResult<PathBuf> {
    let name = field.name().unwrap_or_default().to_string();
    let declared = field.content_type().map(str::to_string);
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read field '{name}': {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest(format!("Field '{name}' is empty")));
    }
    store_image(dir, &bytes, declared.as_deref()).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
