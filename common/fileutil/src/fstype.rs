// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{Context, Result};
use nix::sys::statfs::{statfs, TMPFS_MAGIC};

/// Reports whether the filesystem holding `path` is a tmpfs.
///
/// Uses statfs(2) and compares the filesystem magic, so it works without
/// shelling out to stat(1).
pub fn is_tmpfs(path: &Path) -> Result<bool> {
    let stat = statfs(path).with_context(|| format!("statfs({}) failed", path.display()))?;
    Ok(stat.filesystem_type() == TMPFS_MAGIC)
}
