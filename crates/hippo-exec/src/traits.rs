//! Shell trait shared by every target backend

use std::path::Path;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// A target that can run commands and exchange files.
///
/// Relative paths are resolved against the target's root directory.
/// `exec` reports failures to the caller unless `ignore_error` is set;
/// `send` and `pull` are best-effort and only log failures.
#[async_trait]
pub trait Shell: Send + Sync {
    /// Run `command` in `relative_path` under the target root
    async fn exec(
        &self,
        command: &str,
        relative_path: &str,
        ignore_error: bool,
    ) -> Result<CommandResult, ExecError>;

    /// Copy a local file or directory into `relative_path` on the target
    async fn send(&self, local_path: &Path, relative_path: &str);

    /// Copy `relative_path` from the target into `local_folder`
    async fn pull(&self, local_folder: &Path, relative_path: &str);

    /// Configured target name
    fn name(&self) -> &str;

    /// Base directory for relative paths
    fn root_path(&self) -> &str;

    /// Backend kind, e.g. `"local"`
    fn shell_type(&self) -> &'static str;
}
