//! Uploaded files (profile pictures, post media) live under the configured
//! media root and are referenced in the database by their relative path.

use std::path::{Component, Path, PathBuf};

use axum::body::Bytes;
use axum::extract::Multipart;

use crate::error::{AppError, AppResult};

pub const PROFILE_PICS: &str = "profile_pics";
pub const POST_MEDIA: &str = "post_media";

/// URL path under which a stored file is served.
pub fn url_path(relative: &str) -> String {
    format!("/media/{}", relative)
}

/// Lowercased alphanumeric extension of an uploaded filename, if it has one.
fn safe_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_image(filename: &str) -> bool {
    mime_guess::from_path(filename)
        .first()
        .map(|m| m.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

/// Write an upload under `<root>/<subdir>/` with a generated name.
/// Returns the path relative to `root`.
pub async fn save_upload(
    root: &Path,
    subdir: &str,
    original_name: &str,
    bytes: &[u8],
) -> std::io::Result<String> {
    let dir = root.join(subdir);
    tokio::fs::create_dir_all(&dir).await?;

    let stem = uuid::Uuid::now_v7().to_string();
    let name = match safe_extension(original_name) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    };
    tokio::fs::write(dir.join(&name), bytes).await?;
    Ok(format!("{}/{}", subdir, name))
}

/// Pull the first file part whose field name is one of `names`.
pub async fn read_upload(
    multipart: &mut Multipart,
    names: &[&str],
) -> AppResult<Option<(String, Bytes)>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let wanted = field.name().map(|n| names.contains(&n)).unwrap_or(false);
        if !wanted {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        return Ok(Some((filename, data)));
    }
    Ok(None)
}

/// Map a request path onto the media root, refusing anything that could escape it.
pub fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.as_os_str().is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

/// Delete a stored upload. A file that cannot be removed is only logged.
pub async fn discard(root: &Path, relative: &str) {
    let Some(path) = resolve(root, relative) else {
        return;
    };
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::debug!("could not remove {}: {}", path.display(), e);
    }
}
