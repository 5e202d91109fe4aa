// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Appends `line` plus a trailing newline to the file at `path`, creating
/// the file if it does not exist.
///
/// Cgroup interface files (e.g. `cgroup.procs`) expect this write shape.
pub fn append_file(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for append", path.display()))?;
    writeln!(file, "{}", line).with_context(|| format!("Failed to append to {}", path.display()))
}

/// Replaces the contents of the file at `path` with `content`, creating
/// the file if it does not exist.
pub fn overwrite_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to overwrite {}", path.display()))
}
