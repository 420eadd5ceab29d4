//! Top-level CLI definition and dispatch.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::info;

use crate::core::config::{
    DEFAULT_BUFFER_BYTES, DEFAULT_DELAY_S, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_MS, FileConfig,
    RecvSettings, SendSettings,
};
use crate::core::errors::{BeaconError, Result};
use crate::driver::recv::{self, Layout};
use crate::driver::send;
use crate::session::zk::ZkConnector;

/// zkbeacon — publishes a program's output into an ephemeral coordination node on a fixed interval.
#[derive(Parser)]
#[command(name = "zkbeacon", version, about)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the heartbeat loop: execute a program every interval and publish
    /// its stdout at the node path.
    Send(SendArgs),
    /// Dump a subtree snapshot to a file or a directory mirror.
    Recv(RecvArgs),
    /// Generate shell completions on stdout.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags for `zkbeacon send`. Every flag overrides the config file, which in
/// turn overrides the built-in defaults.
#[derive(clap::Args)]
pub struct SendArgs {
    /// Coordination endpoint, e.g. "zk1:2181,zk2:2181".
    #[arg(long, short = 'e')]
    pub endpoint: Option<String>,
    /// Absolute node path to publish at.
    #[arg(long, short = 'p')]
    pub path: Option<String>,
    /// Program to execute each iteration.
    #[arg(long, short = 'x')]
    pub exec: Option<PathBuf>,
    /// Seconds between iterations (also the per-iteration execution timeout).
    #[arg(long)]
    pub delay_in_s: Option<u64>,
    /// Session timeout in milliseconds.
    #[arg(long)]
    pub timeout_in_ms: Option<u64>,
    /// Capture buffer size in bytes.
    #[arg(long)]
    pub buffer_bytes: Option<usize>,
    /// Bound each run by wall clock instead of re-arming the timeout on
    /// every readiness wait.
    #[arg(long)]
    pub strict_deadline: bool,
    /// TOML config file providing defaults for the flags above.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
    /// Arguments passed to the executed program (after `--`).
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Flags for `zkbeacon recv`.
#[derive(clap::Args)]
pub struct RecvArgs {
    /// Coordination endpoint.
    #[arg(long, short = 'e')]
    pub endpoint: Option<String>,
    /// Absolute path of the subtree to dump.
    #[arg(long, short = 'p')]
    pub path: Option<String>,
    /// Session timeout in milliseconds.
    #[arg(long)]
    pub timeout_in_ms: Option<u64>,
    /// Dump format.
    #[arg(long, value_enum, default_value_t = LayoutArg::File)]
    pub layout: LayoutArg,
    /// Output file ("-" for stdout) or, with --layout tree, output directory.
    #[arg(long, short = 'o', default_value = "-")]
    pub output: PathBuf,
    /// TOML config file providing defaults for the flags above.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

/// CLI spelling of [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    /// Single interleaved file of `parentpath/name|bytelength` records.
    File,
    /// Directory per node, content in a sibling `.data` file.
    Tree,
}

impl From<LayoutArg> for Layout {
    fn from(value: LayoutArg) -> Self {
        match value {
            LayoutArg::File => Self::File,
            LayoutArg::Tree => Self::Tree,
        }
    }
}

/// Dispatch CLI commands.
///
/// # Errors
/// Returns an error if the subcommand fails.
pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Send(args) => {
            let settings = args.resolve()?;
            let shutdown = install_shutdown_flag()?;
            info!(
                "heartbeat for {} via {} every {}s",
                settings.path,
                settings.endpoint,
                settings.delay.as_secs()
            );
            send::run(ZkConnector, &settings, &shutdown)
        }
        Command::Recv(args) => {
            let (settings, layout, output) = args.resolve()?;
            recv::run(ZkConnector, &settings, layout, &output)
        }
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(*shell, &mut command, "zkbeacon", &mut io::stdout());
            Ok(())
        }
    }
}

impl SendArgs {
    /// Merge flags over the config file over the defaults.
    fn resolve(&self) -> Result<SendSettings> {
        let file = load_file(self.config.as_deref())?;
        let exec = self
            .exec
            .clone()
            .or(file.exec)
            .ok_or_else(|| BeaconError::InvalidConfig {
                details: "exec must be given as a flag or in the config file".to_string(),
            })?;
        Ok(SendSettings {
            endpoint: self
                .endpoint
                .clone()
                .or(file.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            path: self.path.clone().or(file.path).unwrap_or_default(),
            exec,
            args: self.args.clone(),
            delay: Duration::from_secs(
                self.delay_in_s.or(file.delay_in_s).unwrap_or(DEFAULT_DELAY_S),
            ),
            session_timeout: Duration::from_millis(
                self.timeout_in_ms
                    .or(file.timeout_in_ms)
                    .unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
            buffer_bytes: self
                .buffer_bytes
                .or(file.buffer_bytes)
                .unwrap_or(DEFAULT_BUFFER_BYTES),
            strict_deadline: self.strict_deadline || file.strict_deadline.unwrap_or(false),
        })
    }
}

impl RecvArgs {
    fn resolve(&self) -> Result<(RecvSettings, Layout, PathBuf)> {
        let file = load_file(self.config.as_deref())?;
        let settings = RecvSettings {
            endpoint: self
                .endpoint
                .clone()
                .or(file.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            path: self.path.clone().or(file.path).unwrap_or_default(),
            session_timeout: Duration::from_millis(
                self.timeout_in_ms
                    .or(file.timeout_in_ms)
                    .unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
        };
        Ok((settings, self.layout.into(), self.output.clone()))
    }
}

fn load_file(path: Option<&std::path::Path>) -> Result<FileConfig> {
    path.map_or_else(|| Ok(FileConfig::default()), FileConfig::load)
}

/// SIGTERM and SIGINT both request an orderly shutdown of the loop.
fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .map_err(|source| BeaconError::io("<signals>", source))?;
    }
    Ok(flag)
}
