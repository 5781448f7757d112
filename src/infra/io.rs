// JSON and path helpers shared by the persistence code.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, IoContext, Result};

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).at(path)?;
    serde_json::from_str(&text).map_err(|e| Error::json(path, e))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Error::json(path, e))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::write(path, text).at(path)?;
    tracing::debug!("Wrote '{}'", path.display());
    Ok(())
}

/// Absolute form of `path` without requiring it to exist.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).at(path)
}

/// Remove a file or a whole directory tree; missing targets are fine.
pub fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path).at(path)
    } else if path.exists() {
        fs::remove_file(path).at(path)
    } else {
        Ok(())
    }
}

/// Copy `src` to `dst` if `src` exists; returns whether anything was copied.
pub fn copy_if_exists(src: &Path, dst: &Path) -> Result<bool> {
    if !src.is_file() {
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::copy(src, dst).at(src)?;
    Ok(true)
}
