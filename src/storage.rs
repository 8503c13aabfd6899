//! Upload storage on local disk.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Strip any directory components from a client-supplied filename.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<&str> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return None;
    }
    Some(base)
}

/// Stored name: `<uuid>_<basename>`, unique per upload.
pub fn stored_filename(original: &str) -> Option<String> {
    sanitize_filename(original).map(|base| format!("{}_{}", Uuid::new_v4(), base))
}

/// Write an uploaded video into `upload_dir`, returning its full path.
pub async fn save_upload(
    upload_dir: &Path,
    original: &str,
    data: &[u8],
) -> Result<PathBuf, std::io::Error> {
    let name = stored_filename(original).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid filename")
    })?;

    tokio::fs::create_dir_all(upload_dir).await?;
    let path = upload_dir.join(name);
    tokio::fs::write(&path, data).await?;

    log::debug!("Saved {} bytes to {:?}", data.len(), path);
    Ok(path)
}
