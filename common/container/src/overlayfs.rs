// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use nix::mount::{umount2, MntFlags};

use crate::config::Container;
use crate::error::ContainerError;

impl Container {
    /// The directory holding all overlay scaffolding:
    /// `<work_dir>/overlay-<id>/`.
    pub fn overlay_root_dir(&self) -> PathBuf {
        self.work_dir.join(format!("overlay-{}", self.id))
    }

    /// Where a tar image is extracted to serve as the lower layer.
    fn image_layer_dir(&self) -> PathBuf {
        self.overlay_root_dir().join("image")
    }

    /// The read-only lower layer. A directory image is used in place; only
    /// a tar image gets extracted into the overlay tree.
    pub fn lower_dir(&self) -> PathBuf {
        if self.image_is_dir {
            self.image_path.clone()
        } else {
            self.image_layer_dir()
        }
    }

    /// The writable upper layer.
    pub fn upper_dir(&self) -> PathBuf {
        self.overlay_root_dir().join("write")
    }

    /// The overlayfs scratch directory, on the same filesystem as the
    /// upper layer.
    fn overlay_work_dir(&self) -> PathBuf {
        self.overlay_root_dir().join(".work")
    }

    /// The mount point presenting the merged view.
    pub fn merged_dir(&self) -> PathBuf {
        self.overlay_root_dir().join("merge")
    }
}

fn ensure_dir_is_empty(dir: &Path) -> Result<()> {
    match std::fs::read_dir(dir)?.next() {
        None => Ok(()),
        Some(Ok(entry)) => bail!(
            "{} is not empty: {} exists",
            dir.display(),
            entry.file_name().to_string_lossy()
        ),
        Some(Err(e)) => Err(e.into()),
    }
}

/// Presents a writable root for the container without mutating the image:
/// extracts a tar image into the lower layer (a directory image is used in
/// place), creates the upper/work/merge directories, and mounts the
/// overlay at [`Container::merged_dir`].
pub fn make_overlay_fs(container: &Container) -> Result<()> {
    let overlay_root = container.overlay_root_dir();

    // A directory image overlapping the overlay tree means the image would
    // shadow (or contain) our own scaffolding; refuse the configuration.
    if container.image_is_dir
        && (container.image_path.starts_with(&overlay_root)
            || overlay_root.starts_with(&container.image_path))
    {
        return Err(ContainerError::ImageInsideOverlay(container.image_path.clone()).into());
    }

    if !container.image_is_dir {
        extract_image(&container.image_path, &container.image_layer_dir())?;
    }

    let mut dir_builder = std::fs::DirBuilder::new();
    dir_builder.recursive(true).mode(0o755);
    for dir in [
        container.upper_dir(),
        container.overlay_work_dir(),
        container.merged_dir(),
    ] {
        dir_builder
            .create(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let overlay_options = format!(
        "lowerdir={},upperdir={},workdir={}",
        container.lower_dir().display(),
        container.upper_dir().display(),
        container.overlay_work_dir().display(),
    );
    processes::run_and_check(
        Command::new("mount")
            .args(["-t", "overlay", "overlay", "-o", &overlay_options])
            .arg(container.merged_dir()),
    )
    .context("Failed to mount overlayfs")?;

    Ok(())
}

/// Extracts a tar image into `target`, which must be empty (or absent).
fn extract_image(image_path: &Path, target: &Path) -> Result<()> {
    tracing::info!(
        image = %image_path.display(),
        target = %target.display(),
        "Extracting image"
    );

    fileutil::ensure_dir_exists(target)?;
    ensure_dir_is_empty(target)?;

    processes::run_and_check(
        Command::new("tar")
            .arg("-xvf")
            .arg(image_path)
            .arg("-C")
            .arg(target),
    )
    .with_context(|| format!("Failed to extract image {}", image_path.display()))
}

/// Unmounts the merged view and removes the overlay scaffolding.
///
/// Best-effort: failures are logged and the teardown keeps going, since
/// the caller may already be on an error path. An unmount failure is not
/// retried.
pub fn destroy_overlay_fs(container: &Container) {
    let merged_dir = container.merged_dir();
    if let Err(e) = umount2(&merged_dir, MntFlags::MNT_DETACH) {
        tracing::warn!("Failed to unmount {}: {}", merged_dir.display(), e);
    }
    fileutil::remove_dir_all_logged(&container.overlay_root_dir());
}
