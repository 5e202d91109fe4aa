// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use anyhow::Result;
use cgroups::Resources;
use serde::{Deserialize, Serialize};

use crate::error::ContainerError;

/// The host's view of one container. Built from CLI flags, validated and
/// defaulted by [`check_container`], then consumed by [`run`](crate::run).
#[derive(Clone, Debug, Default)]
pub struct Container {
    /// Stable identifier, a random UUID unless supplied.
    pub id: String,
    /// Display name; defaults to the leading 8 characters of the id.
    pub name: String,

    /// The command to run inside the container. Never empty after
    /// validation.
    pub command: Vec<String>,

    /// Scratch directory for overlay scaffolding. NOT the working
    /// directory of the containerized command.
    pub work_dir: PathBuf,
    /// Whether the container inherits the invoking terminal's stdio.
    pub tty: bool,
    /// A rootfs directory or a tar archive.
    pub image_path: PathBuf,
    /// Whether `image_path` is a directory. Populated during validation.
    pub image_is_dir: bool,
    /// Whether to present the image through an overlay filesystem. Forced
    /// on when the image is a tar archive.
    pub overlay: bool,
    /// The cgroup resource budget; zero-valued knobs are not applied.
    pub resources: Resources,
}

/// The configuration sent from the host to the container's PID 1 through
/// the config pipe, as one JSON object:
///
/// ```json
/// {"RootDir": "/path/to/root", "Command": ["/bin/sh", "-c", "echo hi"]}
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InContainerConfig {
    /// The directory PID 1 pivots into as the container's root.
    pub root_dir: PathBuf,
    /// The command PID 1 execs after the mounts are in place.
    pub command: Vec<String>,
}

/// Errors if the container misses necessary fields, and fills in defaults
/// for the optional ones.
pub(crate) fn check_container(container: &mut Container) -> Result<()> {
    // necessary

    if container.command.is_empty() {
        return Err(ContainerError::EmptyCommand.into());
    }
    let metadata = std::fs::metadata(&container.image_path)
        .map_err(|_| ContainerError::ImageNotFound(container.image_path.clone()))?;
    container.image_is_dir = metadata.is_dir();

    if !container.image_is_dir && !container.overlay {
        tracing::warn!(
            image = %container.image_path.display(),
            "Image is not a directory; overlayfs is forced on"
        );
        container.overlay = true;
    }

    // optional

    if container.id.is_empty() {
        container.id = uuid::Uuid::new_v4().to_string();
    }
    if container.name.is_empty() {
        container.name = rand_container_name(&container.id);
    }
    if container.work_dir.as_os_str().is_empty() {
        container.work_dir = default_work_dir(&container.id);
    }

    Ok(())
}

fn rand_container_name(container_id: &str) -> String {
    if container_id.len() < 8 {
        return container_id.to_owned();
    }
    container_id[0..8].to_owned()
}

/// The scratch directory used when the caller does not supply one:
/// `<tmp>/hind/container/<id>`.
pub fn default_work_dir(container_id: &str) -> PathBuf {
    std::env::temp_dir()
        .join("hind")
        .join("container")
        .join(container_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable_container() -> Container {
        Container {
            command: vec!["/bin/true".to_owned()],
            image_path: PathBuf::from("/"),
            overlay: true,
            ..Default::default()
        }
    }

    #[test]
    fn check_container_rejects_empty_command() {
        let mut container = Container {
            command: vec![],
            ..runnable_container()
        };
        let err = check_container(&mut container).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::EmptyCommand)
        ));
    }

    #[test]
    fn check_container_rejects_missing_image() {
        let mut container = Container {
            image_path: PathBuf::from("/does/not/exist"),
            ..runnable_container()
        };
        let err = check_container(&mut container).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::ImageNotFound(_))
        ));
    }

    #[test]
    fn check_container_fills_defaults() -> Result<()> {
        let mut container = runnable_container();
        check_container(&mut container)?;

        assert!(!container.id.is_empty());
        assert_eq!(container.name, container.id[0..8].to_owned());
        assert_eq!(container.work_dir, default_work_dir(&container.id));
        assert!(container.image_is_dir);
        Ok(())
    }

    #[test]
    fn check_container_keeps_explicit_fields() -> Result<()> {
        let mut container = Container {
            id: "testid-0123456789".to_owned(),
            name: "testname".to_owned(),
            work_dir: PathBuf::from("/var/tmp/custom"),
            ..runnable_container()
        };
        check_container(&mut container)?;

        assert_eq!(container.id, "testid-0123456789");
        assert_eq!(container.name, "testname");
        assert_eq!(container.work_dir, PathBuf::from("/var/tmp/custom"));
        Ok(())
    }

    #[test]
    fn check_container_forces_overlay_for_tar_images() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let tar_path = temp_dir.path().join("image.tar");
        std::fs::write(&tar_path, b"not really a tar")?;

        let mut container = Container {
            image_path: tar_path,
            overlay: false,
            ..runnable_container()
        };
        check_container(&mut container)?;

        assert!(container.overlay);
        assert!(!container.image_is_dir);
        Ok(())
    }

    #[test]
    fn in_container_config_uses_pascal_case_wire_names() -> Result<()> {
        let config = InContainerConfig {
            root_dir: PathBuf::from("/x"),
            command: vec!["/bin/sh".to_owned(), "-c".to_owned(), "echo hi".to_owned()],
        };
        let encoded = serde_json::to_string(&config)?;
        assert_eq!(
            encoded,
            r#"{"RootDir":"/x","Command":["/bin/sh","-c","echo hi"]}"#
        );
        Ok(())
    }
}
