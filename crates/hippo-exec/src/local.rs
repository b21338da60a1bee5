//! Local command execution using `tokio::process`

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::command::with_env;
use crate::config::LocalConfig;
use crate::error::ExecError;
use crate::path::resolve;
use crate::result::{CommandResult, settle};
use crate::traits::Shell;

/// Local command executor
///
/// Executes commands on the local machine through the system shell, with
/// the resolved target directory as working directory.
#[derive(Debug, Clone)]
pub struct LocalShell {
    config: LocalConfig,
}

impl LocalShell {
    /// Create a new local shell
    #[must_use]
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// Internal method to execute command
    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, cmd: &str, dir: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        // Use shell to support pipes, redirections, etc.
        let child = system_shell(cmd)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(format!("{e} (working directory {dir})")))?;

        let output = child.wait_with_output().await?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "command completed"
        );

        Ok(CommandResult::completed(status, stdout, stderr, duration))
    }
}

impl fmt::Display for LocalShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Local")
    }
}

#[async_trait]
impl Shell for LocalShell {
    async fn exec(
        &self,
        command: &str,
        relative_path: &str,
        ignore_error: bool,
    ) -> Result<CommandResult, ExecError> {
        let dir = resolve(&self.config.root_path, relative_path);
        let command = with_env(self.config.env_cmd.as_deref(), command);

        debug!(target_name = %self, dir = %dir, command = %command, "exec");

        let outcome = self.execute(&command, &dir).await;
        settle(&self.to_string(), &command, outcome, ignore_error)
    }

    async fn send(&self, local_path: &Path, relative_path: &str) {
        let dest = resolve(&self.config.root_path, relative_path);
        debug!(src = %local_path.display(), dest = %dest, "copying to target");

        if let Err(e) = copy_into(local_path, Path::new(&dest)).await {
            error!(src = %local_path.display(), dest = %dest, error = %e, "error copying file");
        }
    }

    async fn pull(&self, local_folder: &Path, relative_path: &str) {
        let src = resolve(&self.config.root_path, relative_path);
        debug!(src = %src, dest = %local_folder.display(), "copying from target");

        if let Err(e) = copy_into(Path::new(&src), local_folder).await {
            error!(src = %src, dest = %local_folder.display(), error = %e, "error pulling file");
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn root_path(&self) -> &str {
        &self.config.root_path
    }

    fn shell_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(unix)]
fn system_shell(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    command
}

#[cfg(windows)]
fn system_shell(cmd: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(cmd);
    command
}

/// Copy `src` into `dest_dir`, creating `dest_dir` first.
///
/// Directories land at `dest_dir/<name>` with their structure preserved;
/// existing files are overwritten.
async fn copy_into(src: &Path, dest_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dest_dir).await?;

    let name = src
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
    let target = dest_dir.join(name);

    if fs::metadata(src).await?.is_dir() {
        copy_dir_all(src.to_path_buf(), target).await
    } else {
        fs::copy(src, &target).await.map(|_| ())
    }
}

fn copy_dir_all(
    src: PathBuf,
    dst: PathBuf,
) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send>> {
    Box::pin(async move {
        fs::create_dir_all(&dst).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_dir_all(entry.path(), target).await?;
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
        Ok(())
    })
}
