// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cgroups::{V1fsManager, DEFAULT_BASE_PATH};
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe2, Pid};

use crate::cleanup::CleanupStack;
use crate::cmdpipe::send_config;
use crate::config::{check_container, default_work_dir, Container, InContainerConfig};
use crate::overlayfs::{destroy_overlay_fs, make_overlay_fs};
use crate::parent::spawn_bootstrap;

/// The fixed cgroup this runtime enrolls its container into. Part of the
/// contract: one container instance per host at a time.
pub const CGROUP_NAME: &str = "hind/container";

/// Creates the container and runs its command to completion.
///
/// This is the host side of the lifecycle: validate, spawn the bootstrap
/// child into fresh namespaces, budget it with cgroups, prepare its root,
/// hand it the config, and wait. Every setup step registers its teardown
/// on a LIFO cleanup stack that runs on all exit paths; a failure after
/// the child exists kills the child before returning.
pub fn run(mut container: Container) -> Result<WaitStatus> {
    check_container(&mut container)?;
    tracing::info!(
        id = %container.id,
        name = %container.name,
        "Setting up container"
    );

    let (pipe_r, pipe_w) = create_config_pipe()?;

    let child = spawn_bootstrap(&container, pipe_r)
        .context("Failed to start the container process")?;
    tracing::info!(pid = child.as_raw(), "Container process started");

    let mut cleanups = CleanupStack::new();

    // The work dir must outlive everything scaffolded inside it, so its
    // cleanup is registered first (and runs last). A caller-supplied work
    // dir is left alone.
    if container.work_dir == default_work_dir(&container.id) {
        let work_dir = container.work_dir.clone();
        cleanups.push("remove work dir", move || {
            fileutil::remove_dir_all_logged(&work_dir);
            tracing::info!(removed = %work_dir.display(), "Work dir cleaned up");
        });
    }

    let mut cgroup_manager = V1fsManager::new(DEFAULT_BASE_PATH);
    if let Err(e) = setup_cgroup(&mut cgroup_manager, &container, child) {
        cgroup_manager.destroy();
        kill_container(child);
        return Err(e.context("Failed to set up cgroup"));
    }
    cleanups.push("destroy cgroup", move || {
        cgroup_manager.destroy();
        tracing::info!("Cgroup destroyed");
    });

    let root_dir = match setup_root_dir(&container) {
        Ok(root_dir) => root_dir,
        Err(e) => {
            if container.overlay {
                destroy_overlay_fs(&container);
            }
            kill_container(child);
            return Err(e.context("Failed to set up root dir"));
        }
    };
    if container.overlay {
        let overlay_container = container.clone();
        cleanups.push("destroy overlayfs", move || {
            destroy_overlay_fs(&overlay_container);
            tracing::info!(
                removed = %overlay_container.overlay_root_dir().display(),
                "Overlayfs destroyed"
            );
        });
    }

    let config = InContainerConfig {
        root_dir,
        command: container.command.clone(),
    };
    let mut pipe_w = pipe_w;
    if let Err(e) = send_config(&config, &mut pipe_w) {
        kill_container(child);
        return Err(e.context("Failed to send config to the container"));
    }
    tracing::info!("Config sent, closing the pipe (w)");
    // The child's read blocks until the write end is gone; close it before
    // waiting.
    drop(pipe_w);

    let state = waitpid(child, Some(WaitPidFlag::__WALL))
        .context("Failed to wait for the container process")?;
    tracing::info!(?state, "Container process exited");

    Ok(state)
}

fn create_config_pipe() -> Result<(OwnedFd, File)> {
    // CLOEXEC on both ends: the child re-arms its read end at fd 3 by hand,
    // and its inherited copy of the write end must die at exec, or its own
    // read would never see EOF.
    let (pipe_r, pipe_w) = pipe2(OFlag::O_CLOEXEC).context("Failed to create config pipe")?;
    Ok(unsafe { (OwnedFd::from_raw_fd(pipe_r), File::from_raw_fd(pipe_w)) })
}

fn setup_cgroup(manager: &mut V1fsManager, container: &Container, child: Pid) -> Result<()> {
    manager.create(CGROUP_NAME)?;
    manager.set(&container.resources)?;
    manager.apply(child.as_raw())?;
    tracing::info!(
        pid = child.as_raw(),
        resources = ?container.resources,
        "Cgroup setup done"
    );
    Ok(())
}

/// Decides what the container will pivot into: the overlay merge dir, or
/// the image directory itself when overlaying is disabled.
fn setup_root_dir(container: &Container) -> Result<PathBuf> {
    if !container.overlay {
        no_overlay_alert(container);
        return Ok(container.image_path.clone());
    }

    make_overlay_fs(container)?;
    let merged_dir = container.merged_dir();
    tracing::info!(merged_dir = %merged_dir.display(), "Overlayfs setup done");
    Ok(merged_dir)
}

fn no_overlay_alert(container: &Container) {
    let pause = Duration::from_secs(1);
    tracing::warn!(
        image = %container.image_path.display(),
        "Overlayfs is disabled: the container runs directly in the image \
         directory and can modify anything in it. Pausing for {:?}; press \
         Ctrl+C to abort",
        pause
    );
    std::thread::sleep(pause);
}

/// Forcefully stops a container whose setup went wrong, and reaps it.
fn kill_container(child: Pid) {
    if let Err(e) = kill(child, Signal::SIGKILL) {
        tracing::warn!(pid = child.as_raw(), "Failed to kill container: {}", e);
        return;
    }
    if let Err(e) = waitpid(child, Some(WaitPidFlag::__WALL)) {
        tracing::warn!(pid = child.as_raw(), "Failed to reap container: {}", e);
    }
}
