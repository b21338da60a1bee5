//! hippo-ssh: Remote host shell over SSH
//!
//! Runs commands over a persistent russh connection and moves files with the
//! SCP protocol on exec channels of the same connection.

pub mod auth;
pub mod scp;
pub mod ssh;

pub use auth::{AuthError, AuthMethod};
pub use ssh::SshShell;
