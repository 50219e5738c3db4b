//! Crash-safe JSON file replacement.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The bytes are written to a temporary file in the same directory, synced,
/// then renamed over the target, so readers see either the old or the new
/// file and never a partial one.
///
/// # Errors
///
/// Returns `AppError::Persistence` if serialization, directory creation,
/// writing, or the final rename fails.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|err| {
        AppError::Persistence(format!("failed to create {}: {err}", dir.display()))
    })?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|err| {
        AppError::Persistence(format!("failed to create temp file in {}: {err}", dir.display()))
    })?;
    temp.write_all(&bytes)
        .and_then(|()| temp.write_all(b"\n"))
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| AppError::Persistence(format!("failed to write temp file: {err}")))?;
    temp.persist(path).map_err(|err| {
        AppError::Persistence(format!("failed to replace {}: {}", path.display(), err.error))
    })?;

    Ok(())
}

/// Read and deserialize a JSON file, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns `AppError::Persistence` if the file exists but cannot be read
/// or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AppError::Persistence(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };
    let value = serde_json::from_slice(&raw).map_err(|err| {
        AppError::Persistence(format!("failed to parse {}: {err}", path.display()))
    })?;
    Ok(Some(value))
}
