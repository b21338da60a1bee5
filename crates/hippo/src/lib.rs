//! hippo: run commands and move files on local, adb and SSH targets
//!
//! Re-exports the `Shell` abstraction and its backends, and builds shells
//! from TOML configuration.

pub mod config;
pub mod factory;
pub mod logging;

pub use config::{ConfigError, HippoConfig, TargetConfig};
pub use hippo_exec::{
    AdbConfig, AdbShell, CommandResult, ExecError, LocalConfig, LocalShell, Shell, SshConfig,
};
pub use hippo_ssh::SshShell;
