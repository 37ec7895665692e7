//! Command-line interface definitions using clap.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::logging::LogFormat;
use crate::queue::QueueOrder;
use crate::version;

/// Language server with a multi-process request engine.
///
/// Speaks LSP over stdin/stdout. Document lifecycle messages run in order on
/// the main process; everything else is served by a pool of worker processes.
#[derive(Parser, Debug)]
#[command(name = "lantern")]
#[command(author, version = version::long_version(), about, long_about = None)]
pub struct Cli {
    /// Number of worker processes (0 runs requests inline).
    #[arg(long, env = "LANTERN_WORKERS", default_value_t = default_workers())]
    pub workers: usize,

    /// How long an idle worker or responder sleeps between polls.
    #[arg(long, env = "LANTERN_POLL_INTERVAL_MS", default_value_t = 1)]
    pub poll_interval_ms: u64,

    /// Which queued request is served first.
    #[arg(long, env = "LANTERN_QUEUE_ORDER", value_enum, default_value_t)]
    pub queue_order: QueueOrderArg,

    /// What to do when a worker dies unexpectedly.
    #[arg(long, env = "LANTERN_RESTART_POLICY", value_enum, default_value_t)]
    pub restart_policy: RestartPolicyArg,

    /// Restarts allowed per worker slot with `--restart-policy restart`.
    #[arg(long, env = "LANTERN_MAX_WORKER_RESTARTS", default_value_t = 3)]
    pub max_worker_restarts: usize,

    /// Seconds to wait for workers to exit at shutdown before killing them.
    #[arg(long, env = "LANTERN_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Directories searched for `lantern/extension.toml` (colon separated).
    #[arg(long, env = "LANTERN_EXTENSION_PATH", value_delimiter = ':')]
    pub extension_path: Vec<PathBuf>,

    /// Use stdio for the protocol. Accepted for editor compatibility; it is the only transport.
    #[arg(long)]
    pub stdio: bool,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format: pretty, compact or json.
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file (rotated daily).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long, hide = true)]
    pub internal_worker: bool,

    #[arg(long, hide = true, requires = "internal_worker")]
    pub bridge: Option<PathBuf>,

    #[arg(long, hide = true, default_value_t = 0)]
    pub worker_id: usize,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands. Without one, the language server starts.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "lantern",
            &mut std::io::stdout(),
        );
    }
}

/// Half the cores, at least one and at most four.
fn default_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 2).clamp(1, 4)
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueOrderArg {
    /// Oldest request first.
    #[default]
    Fifo,
    /// Newest request first.
    Lifo,
}

impl From<QueueOrderArg> for QueueOrder {
    fn from(arg: QueueOrderArg) -> Self {
        match arg {
            QueueOrderArg::Fifo => QueueOrder::Fifo,
            QueueOrderArg::Lifo => QueueOrder::Lifo,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicyArg {
    /// Log the crash and keep going with fewer workers.
    #[default]
    Report,
    /// Spawn a replacement worker.
    Restart,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["lantern"]).unwrap();
        assert!((1..=4).contains(&cli.workers));
        assert_eq!(cli.poll_interval_ms, 1);
        assert_eq!(cli.queue_order, QueueOrderArg::Fifo);
        assert_eq!(cli.restart_policy, RestartPolicyArg::Report);
        assert_eq!(cli.max_worker_restarts, 3);
        assert!(!cli.internal_worker);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_server_flags() {
        let cli = Cli::try_parse_from([
            "lantern",
            "--stdio",
            "--workers",
            "0",
            "--queue-order",
            "lifo",
            "--restart-policy",
            "restart",
            "--extension-path",
            "/a:/b",
            "--log-format",
            "json",
            "-vv",
        ])
        .unwrap();
        assert!(cli.stdio);
        assert_eq!(cli.workers, 0);
        assert_eq!(QueueOrder::from(cli.queue_order), QueueOrder::Lifo);
        assert_eq!(cli.restart_policy, RestartPolicyArg::Restart);
        assert_eq!(
            cli.extension_path,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_worker_flags() {
        let cli = Cli::try_parse_from([
            "lantern",
            "--internal-worker",
            "--bridge",
            "/tmp/lantern-x/bridge.sock",
            "--worker-id",
            "3",
        ])
        .unwrap();
        assert!(cli.internal_worker);
        assert_eq!(cli.worker_id, 3);
        assert_eq!(cli.bridge, Some(PathBuf::from("/tmp/lantern-x/bridge.sock")));
    }

    #[test]
    fn test_bridge_requires_worker_mode() {
        assert!(Cli::try_parse_from(["lantern", "--bridge", "/tmp/s"]).is_err());
    }

    #[test]
    fn test_completions_subcommand() {
        let cli = Cli::try_parse_from(["lantern", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Completions(_))));
    }

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }
}
