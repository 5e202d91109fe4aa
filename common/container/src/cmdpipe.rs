// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, RawFd};

use anyhow::{Context, Result};

use crate::config::InContainerConfig;
use crate::error::ContainerError;

/// The descriptor number at which the bootstrap child inherits the read
/// end of the config pipe, right after stdin/stdout/stderr.
pub const CONFIG_FD: RawFd = 3;

/// Writes the config into the pipe as one JSON object plus a newline.
///
/// This runs on the host. The channel carries exactly one message per
/// container; the caller closes the write end right after this returns so
/// the child's read hits EOF.
pub(crate) fn send_config(config: &InContainerConfig, pipe_w: &mut impl Write) -> Result<()> {
    tracing::debug!(?config, "Sending config");
    serde_json::to_writer(&mut *pipe_w, config).context("Failed to encode config")?;
    pipe_w
        .write_all(b"\n")
        .context("Failed to write config to pipe")?;
    Ok(())
}

/// Reads the config sent by [`send_config`] from fd 3.
///
/// This runs inside the container, before any mounts. Refuses configs with
/// missing fields, including the empty config produced when the host
/// closed the pipe without writing.
pub(crate) fn recv_config() -> Result<InContainerConfig> {
    let mut pipe = unsafe { File::from_raw_fd(CONFIG_FD) };
    recv_config_from(&mut pipe)
}

fn recv_config_from(pipe: &mut impl Read) -> Result<InContainerConfig> {
    let mut raw = Vec::new();
    pipe.read_to_end(&mut raw)
        .context("Failed to read config from pipe")?;
    tracing::debug!(raw = %String::from_utf8_lossy(&raw), "Config received");

    let config: InContainerConfig = if raw.iter().all(u8::is_ascii_whitespace) {
        InContainerConfig::default()
    } else {
        serde_json::from_slice(&raw).context("Failed to decode config")?
    };

    if config.root_dir.as_os_str().is_empty() {
        return Err(ContainerError::EmptyRootDir.into());
    }
    if config.command.is_empty() {
        return Err(ContainerError::EmptyCommand.into());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::os::fd::FromRawFd;
    use std::path::PathBuf;

    use super::*;

    fn os_pipe() -> Result<(File, File)> {
        let (r, w) = nix::unistd::pipe()?;
        Ok(unsafe { (File::from_raw_fd(r), File::from_raw_fd(w)) })
    }

    #[test]
    fn config_round_trips_through_a_pipe() -> Result<()> {
        let config = InContainerConfig {
            root_dir: PathBuf::from("/x"),
            command: vec!["/bin/sh".to_owned(), "-c".to_owned(), "echo hi".to_owned()],
        };

        let (mut pipe_r, mut pipe_w) = os_pipe()?;
        send_config(&config, &mut pipe_w)?;
        drop(pipe_w);

        assert_eq!(recv_config_from(&mut pipe_r)?, config);
        Ok(())
    }

    #[test]
    fn empty_pipe_is_rejected() -> Result<()> {
        let (mut pipe_r, pipe_w) = os_pipe()?;
        drop(pipe_w);

        let err = recv_config_from(&mut pipe_r).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::EmptyRootDir)
        ));
        Ok(())
    }

    #[test]
    fn config_without_command_is_rejected() -> Result<()> {
        let (mut pipe_r, mut pipe_w) = os_pipe()?;
        pipe_w.write_all(br#"{"RootDir": "/x", "Command": []}"#)?;
        drop(pipe_w);

        let err = recv_config_from(&mut pipe_r).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContainerError>(),
            Some(ContainerError::EmptyCommand)
        ));
        Ok(())
    }
}
