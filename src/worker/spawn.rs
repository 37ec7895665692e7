//! Starting worker processes.
//!
//! Workers are this same executable re-run in `--internal-worker` mode rather
//! than forked copies, so each one boots cleanly with its own registry and
//! connects back over the bridge socket.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::proc::Proc;
use crate::error::{LanternError, Result};
use crate::logging::LogFormat;

/// Everything a worker needs on its command line.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub bridge: PathBuf,
    pub poll_interval: Duration,
    pub extension_paths: Vec<PathBuf>,
    pub verbose: u8,
    pub log_format: Option<LogFormat>,
    pub log_file: Option<PathBuf>,
}

impl WorkerCommand {
    /// A command that re-runs the current executable.
    pub fn current_exe(bridge: PathBuf) -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            LanternError::Worker(format!("Failed to locate current executable: {}", e))
        })?;
        Ok(Self {
            program,
            bridge,
            poll_interval: Duration::from_millis(1),
            extension_paths: Vec::new(),
            verbose: 0,
            log_format: None,
            log_file: None,
        })
    }

    pub fn command(&self, worker_id: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--internal-worker")
            .arg("--bridge")
            .arg(&self.bridge)
            .arg("--worker-id")
            .arg(worker_id.to_string())
            .arg("--poll-interval-ms")
            .arg(self.poll_interval.as_millis().to_string());
        for path in &self.extension_paths {
            cmd.arg("--extension-path").arg(path);
        }
        for _ in 0..self.verbose {
            cmd.arg("-v");
        }
        if let Some(format) = self.log_format {
            cmd.arg("--log-format").arg(format.to_string());
        }
        if let Some(file) = &self.log_file {
            cmd.arg("--log-file").arg(file);
        }

        // Stdout is the protocol channel and belongs to the main process.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());
        cmd
    }
}

pub fn spawn_worker(command: &WorkerCommand, worker_id: usize) -> Result<Proc> {
    let child = command
        .command(worker_id)
        .spawn()
        .map_err(|e| LanternError::Worker(format!("Failed to spawn worker {}: {}", worker_id, e)))?;
    tracing::debug!(worker_id, pid = child.id(), "Spawned worker");
    Ok(Proc::from_child(child))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_command_line() {
        let command = WorkerCommand {
            program: PathBuf::from("/usr/bin/lantern"),
            bridge: PathBuf::from("/tmp/lantern-x/bridge.sock"),
            poll_interval: Duration::from_millis(3),
            extension_paths: vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")],
            verbose: 2,
            log_format: Some(LogFormat::Json),
            log_file: None,
        };
        let cmd = command.command(4);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--internal-worker",
                "--bridge",
                "/tmp/lantern-x/bridge.sock",
                "--worker-id",
                "4",
                "--poll-interval-ms",
                "3",
                "--extension-path",
                "/opt/a",
                "--extension-path",
                "/opt/b",
                "-v",
                "-v",
                "--log-format",
                "json",
            ]
        );
        assert_eq!(cmd.get_program(), "/usr/bin/lantern");
    }
}
