// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::sched::{clone, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2, execv, Pid};

use crate::cmdpipe::CONFIG_FD;
use crate::config::Container;

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Spawns the bootstrap process: this same binary re-executed with the
/// `init` subcommand, inside fresh UTS/PID/mount/network/IPC namespaces,
/// with the config pipe's read end inherited at fd 3.
///
/// The namespace set is all-or-nothing; if clone(2) refuses any of the
/// flags, no child is started.
pub(crate) fn spawn_bootstrap(container: &Container, pipe_r: OwnedFd) -> Result<Pid> {
    let flags = CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWIPC;

    let tty = container.tty;
    let pipe_fd = pipe_r.as_raw_fd();
    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let pid = clone(
        Box::new(move || match exec_bootstrap(tty, pipe_fd) {
            Ok(infallible) => match infallible {},
            // The parent observes this as a non-zero wait status.
            Err(_) => 127,
        }),
        &mut stack,
        flags,
        Some(libc::SIGCHLD),
    )
    .context("Failed to clone the bootstrap process into new namespaces")?;

    // The child holds its own copy of the read end; drop ours so the pipe
    // keeps exactly one reader and one writer.
    drop(pipe_r);
    Ok(pid)
}

/// The child half of the clone: arrange descriptors, then exec into the
/// `init` entrypoint.
fn exec_bootstrap(tty: bool, pipe_fd: RawFd) -> Result<Infallible> {
    if !tty {
        let dev_null = open("/dev/null", OFlag::O_RDWR, Mode::empty())
            .context("Failed to open /dev/null")?;
        for stdio_fd in 0..3 {
            dup2(dev_null, stdio_fd)?;
        }
        if dev_null > 2 {
            close(dev_null)?;
        }
    }

    if pipe_fd == CONFIG_FD {
        // Already at the expected number; clear CLOEXEC so the descriptor
        // survives the exec.
        fcntl(pipe_fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
    } else {
        dup2(pipe_fd, CONFIG_FD)?;
    }

    let exe = CString::new("/proc/self/exe")?;
    let argv = [exe.clone(), CString::new("init")?];
    execv(&exe, &argv).context("Failed to exec /proc/self/exe init")
}
