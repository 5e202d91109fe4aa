// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Result};
use nix::sys::signal::Signal;
use signal_hook::{
    consts::signal::{SIGCHLD, SIGINT, SIGTERM},
    iterator::Signals,
};
use std::process::{Command, ExitStatus};
use tracing::instrument;

// run runs a child process, with some special signal handling:
//   - Forwards SIGTERM to the child process
//   - Ignores SIGINT while the process is running. SIGINT is normally
//     generated by the terminal when Ctrl+C is pressed, and is sent to all
//     processes in the foreground process group, so the child receives it
//     by default without our help.
#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run(cmd: &mut Command) -> Result<ExitStatus> {
    // Register the signal handler before spawning the process to ensure we don't drop any signals.
    let mut signals = Signals::new([SIGCHLD, SIGINT, SIGTERM])?;

    let mut child = cmd.spawn()?;

    for signal in signals.forever() {
        match signal {
            SIGCHLD => match &child.try_wait()? {
                Some(status) => return Ok(*status),
                None => continue,
            },
            SIGINT => {}
            SIGTERM => nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(child.id().try_into()?),
                Signal::SIGTERM,
            )?,
            _ => unreachable!(),
        }
    }
    unreachable!()
}

#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run_and_check(cmd: &mut Command) -> Result<()> {
    let status = run(cmd)?;
    if !status.success() {
        bail!("Command {cmd:?} failed with {status}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_process() -> Result<()> {
        run_and_check(&mut Command::new("true"))?;
        Ok(())
    }

    #[test]
    fn runs_failed_process() -> Result<()> {
        run(&mut Command::new("false"))?;
        assert!(run_and_check(&mut Command::new("false")).is_err());
        Ok(())
    }
}
