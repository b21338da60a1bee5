//! Shell construction from target configuration

use hippo_exec::{AdbShell, ExecError, LocalShell, Shell};
use hippo_ssh::SshShell;
use tracing::info;

use crate::config::TargetConfig;

impl TargetConfig {
    /// Build the shell for this target
    ///
    /// Local and adb targets are stateless and always succeed; ssh targets
    /// connect and authenticate here.
    ///
    /// # Errors
    /// Returns the connection error for ssh targets
    pub async fn connect(&self) -> Result<Box<dyn Shell>, ExecError> {
        let shell: Box<dyn Shell> = match self {
            TargetConfig::Local(config) => Box::new(LocalShell::new(config.clone())),
            TargetConfig::Adb(config) => Box::new(AdbShell::new(config.clone())),
            TargetConfig::Ssh(config) => Box::new(SshShell::connect(config.clone()).await?),
        };

        info!(
            target_name = %shell.name(),
            shell_type = shell.shell_type(),
            root = %shell.root_path(),
            "target ready"
        );
        Ok(shell)
    }
}
