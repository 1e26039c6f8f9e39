//! Output placement and temporary file cleanup.

use std::fs;
use std::path::Path;

use capstan_common::{CapstanError, CapstanResult};

/// Move `from` onto `to`, replacing any existing file.
///
/// Tries a rename first. A rename blocked by an existing destination is
/// retried after removing it; a cross-device rename falls back to copy and
/// delete.
pub fn replace_file(from: &Path, to: &Path) -> CapstanResult<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            CapstanError::finalize_io(to, format!("Failed to create output directory: {e}"))
        })?;
    }

    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    if to.exists() {
        fs::remove_file(to).map_err(|e| {
            CapstanError::finalize_io(to, format!("Failed to replace existing file: {e}"))
        })?;
        if fs::rename(from, to).is_ok() {
            return Ok(());
        }
    }

    fs::copy(from, to)
        .map_err(|e| CapstanError::finalize_io(to, format!("Failed to place output: {e}")))?;
    remove_quietly(from);
    Ok(())
}

/// Best-effort removal. A missing file is not an error.
pub fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "Could not remove file"),
    }
}

/// File size in bytes, zero if it does not exist.
pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
