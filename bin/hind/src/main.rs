// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use cgroups::Resources;
use clap::{Parser, Subcommand};
use cliutil::{cli_main, handle_top_level_result, log_current_command_line};
use container::Container;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(name = "hind", about = "A minimal container runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    /// The in-container bootstrap. Internal use only: it expects fresh
    /// namespaces and the config pipe at fd 3. Never run it directly.
    #[command(hide = true)]
    Init,
}

/// Create and run a new container with namespace and cgroup limits.
#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Assign a name to the container.
    #[arg(long)]
    name: Option<String>,

    /// Allocate a pseudo-TTY.
    #[arg(short = 't', long)]
    tty: bool,

    /// Keep STDIN open.
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Run directly in the image directory, read-write, without an overlay.
    /// Requires IMAGE to be a directory.
    #[arg(long)]
    no_overlay: bool,

    /// CPU hardcap limit in usecs (cpu.cfs_quota_us).
    #[arg(long)]
    cpu_quota_us: Option<i64>,

    /// CPU period in usecs for hardcapping (cpu.cfs_period_us).
    #[arg(long)]
    cpu_period_us: Option<u64>,

    /// CPUs the container may run on, e.g. "0-3,5" (cpuset.cpus).
    #[arg(long)]
    cpuset_cpus: Option<String>,

    /// Memory hard limit in bytes (memory.limit_in_bytes).
    #[arg(long)]
    memory_limit_bytes: Option<u64>,

    /// A rootfs directory or tar archive. "noimg" means the host root.
    image: String,

    /// The command to run, with its arguments. Everything after IMAGE is
    /// forwarded verbatim, flags included.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cli_main(|| do_run(args), Default::default()),
        Commands::Init => do_init(),
    }
}

fn do_run(args: RunArgs) -> Result<()> {
    let state = container::run(build_container(args))?;
    tracing::info!(?state, "Container done");
    Ok(())
}

/// The init entrypoint configures logging by hand: console only (any log
/// file would outlive the mount namespace), and nothing that spawns
/// threads before the mount syscalls.
fn do_init() -> ExitCode {
    let _guard = cliutil::LoggingConfig {
        log_file: None,
        console_logger: Some(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        ),
    }
    .setup()
    .unwrap();
    log_current_command_line();

    match container::bootstrap() {
        Ok(infallible) => match infallible {},
        result => handle_top_level_result(result),
    }
}

/// Translates CLI flags into the host-side container record. Validation
/// and defaulting happen later, in `container::run`.
fn build_container(args: RunArgs) -> Container {
    let image = if args.image.eq_ignore_ascii_case("noimg") {
        "/".to_owned()
    } else {
        args.image
    };

    Container {
        name: args.name.unwrap_or_default(),
        command: args.command,
        tty: args.tty || args.interactive,
        image_path: PathBuf::from(image),
        overlay: !args.no_overlay,
        resources: Resources {
            cpu_quota_us: args.cpu_quota_us.unwrap_or(0),
            cpu_period_us: args.cpu_period_us.unwrap_or(0),
            cpuset_cpus: args.cpuset_cpus.unwrap_or_default(),
            memory_limit_bytes: args.memory_limit_bytes.unwrap_or(0),
        },
        ..Default::default()
    }
}
