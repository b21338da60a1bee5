//! hippo-exec: Target shell abstraction
//!
//! Provides the `Shell` trait and the local and adb implementations, plus the
//! path and command helpers every backend shares.

pub mod adb;
pub mod command;
pub mod config;
pub mod error;
pub mod local;
pub mod path;
pub mod result;
pub mod traits;

pub use adb::AdbShell;
pub use config::{AdbConfig, LocalConfig, SshConfig};
pub use error::ExecError;
pub use local::LocalShell;
pub use result::{CommandResult, LAUNCH_FAILURE_STATUS, settle};
pub use traits::Shell;
