// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{execv, pivot_root};

use crate::cmdpipe::recv_config;

/// The in-container bootstrap, running as PID 1 of the fresh namespaces.
///
/// Receives the config over fd 3, pivots into the prepared root, mounts
/// /proc and /dev, and replaces itself with the user command. On success
/// control never returns; the user command keeps PID 1 and receives
/// signals directly.
pub fn bootstrap() -> Result<Infallible> {
    let config = recv_config()?;
    tracing::info!(?config, "Bootstrapping container");

    enter_root(&config.root_dir)?;
    mount_proc()?;
    mount_dev()?;

    exec_command(&config.command)
}

/// Makes `root_dir` the root of this mount namespace via pivot_root(2).
fn enter_root(root_dir: &Path) -> Result<()> {
    // Remount all file systems as private so that none of the mounts below
    // propagate back to the host.
    mount(
        Some(""),
        "/",
        Some(""),
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        Some(""),
    )
    .context("Failed to remount file systems as private")?;

    // pivot_root requires the new root to be a mount point distinct from
    // the old root's; bind-mounting it onto itself satisfies that.
    mount(
        Some(root_dir),
        root_dir,
        Some(""),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        Some(""),
    )
    .with_context(|| format!("Failed to bind-mount {} onto itself", root_dir.display()))?;

    let put_old_name = format!(".hostroot-{}", uuid::Uuid::new_v4().simple());
    std::fs::create_dir(root_dir.join(&put_old_name))
        .context("Failed to create the old-root landing directory")?;

    // We switch into the root dir so that pivot_root will automatically
    // update our CWD to point to the new root.
    std::env::set_current_dir(root_dir)
        .with_context(|| format!("Failed to `cd {}`", root_dir.display()))?;
    pivot_root(".", &root_dir.join(&put_old_name)).context("Failed to pivot root")?;
    std::env::set_current_dir("/").context("Failed to `cd /` after pivot")?;

    // Detach the old root and drop its landing directory; nothing from the
    // host mount tree stays reachable.
    let put_old = Path::new("/").join(&put_old_name);
    umount2(&put_old, MntFlags::MNT_DETACH)
        .with_context(|| format!("Failed to unmount {}", put_old.display()))?;
    std::fs::remove_dir(&put_old)
        .with_context(|| format!("Failed to remove {}", put_old.display()))?;

    Ok(())
}

fn mount_proc() -> Result<()> {
    fileutil::ensure_dir_exists(Path::new("/proc"))?;
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        Some(""),
    )
    .context("Failed to mount /proc")
}

fn mount_dev() -> Result<()> {
    fileutil::ensure_dir_exists(Path::new("/dev"))?;
    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .context("Failed to mount /dev")
}

fn exec_command(command: &[String]) -> Result<Infallible> {
    // Resolve against the container's PATH, not the host's; the
    // environment travels into the container unchanged.
    let program = which::which(&command[0])
        .with_context(|| format!("Command {:?} not found in container PATH", command[0]))?;

    let escaped_command = command
        .iter()
        .map(|s| shell_escape::escape(s.as_str().into()))
        .join(" ");
    eprintln!("COMMAND(container): {}", &escaped_command);

    let filename = CString::new(program.as_os_str().as_bytes())?;
    let argv: Vec<CString> = command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<Result<_, _>>()?;
    execv(&filename, &argv).with_context(|| format!("Failed to exec {}", program.display()))
}
