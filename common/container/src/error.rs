// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

/// Validation failures surfaced before (host side) or instead of (container
/// side) running the user command.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container command is empty")]
    EmptyCommand,
    #[error("in-container root dir is empty")]
    EmptyRootDir,
    #[error("image path {0} does not exist")]
    ImageNotFound(PathBuf),
    #[error("image directory {0} overlaps the overlay working tree")]
    ImageInsideOverlay(PathBuf),
}
