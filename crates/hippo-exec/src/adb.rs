//! Android device execution through the `adb` command-line bridge
//!
//! Every call re-invokes the bridge tool; there is no persistent connection.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::command::{compose, mkdir_p};
use crate::config::AdbConfig;
use crate::error::ExecError;
use crate::path::resolve;
use crate::result::{CommandResult, settle};
use crate::traits::Shell;

/// Device shell backed by `adb shell`, `adb push` and `adb pull`
#[derive(Debug, Clone)]
pub struct AdbShell {
    config: AdbConfig,
}

impl AdbShell {
    /// Create a new adb shell
    #[must_use]
    pub fn new(config: AdbConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &AdbConfig {
        &self.config
    }

    fn device_label(&self) -> &str {
        self.config.device_id.as_deref().unwrap_or("default")
    }

    /// Arguments for one bridge invocation, scoped to the configured device
    fn adb_args<'a>(&'a self, subcommand: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(rest.len() + 3);
        if let Some(id) = &self.config.device_id {
            args.push("-s");
            args.push(id.as_str());
        }
        args.push(subcommand);
        args.extend_from_slice(rest);
        args
    }

    /// Run the bridge tool once, bounded by the process timeout
    #[instrument(skip(self), level = "debug", fields(device = %self.device_label()))]
    async fn run_adb(&self, args: &[&str]) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        let limit = self.config.process_timeout;

        let child = Command::new(&self.config.adb_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(format!("{}: {e}", self.config.adb_path)))?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout { timeout: limit })??;

        let duration = start.elapsed();
        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(status = status, duration = ?duration, "adb completed");

        Ok(CommandResult::completed(status, stdout, stderr, duration))
    }

    /// Run `adb push` or `adb pull`, logging instead of returning failures
    async fn transfer(&self, subcommand: &str, from: &str, to: &str) {
        let args = self.adb_args(subcommand, &[from, to]);
        debug!(command = %format!("{} {}", self.config.adb_path, args.join(" ")), "transfer");

        match self.run_adb(&args).await {
            Ok(result) if result.success() => {}
            Ok(result) => error!(
                device = %self.device_label(),
                from = %from,
                to = %to,
                status = result.status,
                stderr = %result.stderr.trim(),
                "adb {subcommand} failed"
            ),
            Err(e) => error!(
                device = %self.device_label(),
                from = %from,
                to = %to,
                error = %e,
                "adb {subcommand} failed"
            ),
        }
    }
}

impl fmt::Display for AdbShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ADB_Env_{}", self.config.name)
    }
}

#[async_trait]
impl Shell for AdbShell {
    async fn exec(
        &self,
        command: &str,
        relative_path: &str,
        ignore_error: bool,
    ) -> Result<CommandResult, ExecError> {
        let dir = resolve(&self.config.root_path, relative_path);
        let remote_cmd = compose(&dir, self.config.env_cmd.as_deref(), command);

        debug!(device = %self.device_label(), command = %remote_cmd, "exec");

        let args = self.adb_args("shell", &[remote_cmd.as_str()]);
        let outcome = self.run_adb(&args).await;
        settle(&self.to_string(), &remote_cmd, outcome, ignore_error)
    }

    async fn send(&self, local_path: &Path, relative_path: &str) {
        let remote = resolve(&self.config.root_path, relative_path);
        debug!(
            src = %local_path.display(),
            device = %self.device_label(),
            dest = %remote,
            "sending file"
        );

        match self.exec(&mkdir_p(&remote), ".", true).await {
            Ok(result) if result.success() => {}
            Ok(result) => debug!(
                dest = %remote,
                status = result.status,
                output = %result.output.trim(),
                "mkdir before push failed"
            ),
            Err(e) => debug!(dest = %remote, error = %e, "mkdir before push failed"),
        }

        let local = local_path.to_string_lossy();
        self.transfer("push", &local, &remote).await;
    }

    async fn pull(&self, local_folder: &Path, relative_path: &str) {
        let remote = resolve(&self.config.root_path, relative_path);
        debug!(
            device = %self.device_label(),
            src = %remote,
            dest = %local_folder.display(),
            "pulling file"
        );

        if let Err(e) = tokio::fs::create_dir_all(local_folder).await {
            error!(dest = %local_folder.display(), error = %e, "failed to create local folder");
            return;
        }

        let local = local_folder.to_string_lossy();
        self.transfer("pull", &remote, &local).await;
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn root_path(&self) -> &str {
        &self.config.root_path
    }

    fn shell_type(&self) -> &'static str {
        "adb"
    }
}
