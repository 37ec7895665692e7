//! Resolved server configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{Cli, RestartPolicyArg};
use crate::extensions::BootOptions;
use crate::logging::{LogConfig, LogFormat};
use crate::queue::QueueOrder;
use crate::worker::{RestartPolicy, WorkerArgs};

/// Everything the server needs, after CLI flags and environment are merged.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default worker count; the client may override it at `initialize`.
    pub workers: usize,
    pub poll_interval: Duration,
    pub queue_order: QueueOrder,
    pub restart_policy: RestartPolicy,
    pub shutdown_timeout: Duration,
    pub boot: BootOptions,
    /// Logging flags forwarded to worker processes.
    pub verbose: u8,
    pub log_format: Option<LogFormat>,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Duration::from_millis(1),
            queue_order: QueueOrder::Fifo,
            restart_policy: RestartPolicy::Report,
            shutdown_timeout: Duration::from_secs(5),
            boot: BootOptions::default(),
            verbose: 0,
            log_format: None,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let restart_policy = match cli.restart_policy {
            RestartPolicyArg::Report => RestartPolicy::Report,
            RestartPolicyArg::Restart => RestartPolicy::Restart {
                max_restarts: cli.max_worker_restarts,
            },
        };
        Self {
            workers: cli.workers,
            poll_interval: poll_interval(cli),
            queue_order: cli.queue_order.into(),
            restart_policy,
            shutdown_timeout: Duration::from_secs(cli.shutdown_timeout_secs),
            boot: boot_options(cli),
            verbose: cli.verbose,
            log_format: cli.log_format,
            log_file: cli.log_file.clone(),
        }
    }
}

/// Worker-mode arguments, if this process was started as a worker.
pub fn worker_args(cli: &Cli) -> Option<WorkerArgs> {
    if !cli.internal_worker {
        return None;
    }
    Some(WorkerArgs {
        worker_id: cli.worker_id,
        bridge: cli.bridge.clone()?,
        poll_interval: poll_interval(cli),
        boot: boot_options(cli),
    })
}

/// Logging configuration: `-v` and `--log-*` flags first, then environment.
pub fn log_config(cli: &Cli) -> LogConfig {
    let mut config = LogConfig::from_verbosity(cli.verbose);
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    let label = if cli.internal_worker {
        format!("worker-{}", cli.worker_id)
    } else {
        "main".to_string()
    };
    config.with_process_label(label).with_env_overrides()
}

fn poll_interval(cli: &Cli) -> Duration {
    Duration::from_millis(cli.poll_interval_ms.max(1))
}

fn boot_options(cli: &Cli) -> BootOptions {
    let project_root = std::env::current_dir().ok();
    BootOptions::new(cli.extension_path.clone(), project_root.as_deref())
}
