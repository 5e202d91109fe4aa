// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod fstype;
mod write;

pub use fstype::*;
pub use write::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Creates a directory and all of its parents. Does nothing if the
/// directory already exists.
pub fn ensure_dir_exists(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))
}

/// Removes a directory tree, logging a warning instead of failing.
///
/// Cleanup paths must keep going after a failed removal, so this never
/// returns an error.
pub fn remove_dir_all_logged(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!("Failed to remove {}: {:?}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_exists_is_idempotent() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path().join("a/b/c");

        ensure_dir_exists(&dir)?;
        ensure_dir_exists(&dir)?;

        assert!(dir.is_dir());
        Ok(())
    }

    #[test]
    fn remove_dir_all_logged_ignores_missing_dir() {
        remove_dir_all_logged(Path::new("/nonexistent/hind-test-dir"));
    }
}
