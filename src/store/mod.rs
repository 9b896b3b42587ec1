// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local storage layer (token file, activity table, stream files).

pub mod cache;
pub mod token_store;

pub use cache::ActivityCache;
pub use token_store::TokenStore;

use crate::error::{AppError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Replace `path` with `bytes` atomically: temp file in the same
/// directory, fsync, rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| AppError::io("Failed to create", dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| AppError::io("Failed to create temp file in", dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| AppError::io("Failed to write", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| AppError::io("Failed to replace", path, e.error))?;
    Ok(())
}
