//! Configuration types for execution targets

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a target on the local machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Target name
    pub name: String,
    /// Base directory for relative paths
    #[serde(default = "default_tmp_root")]
    pub root_path: String,
    /// Command prepended to every executed command
    #[serde(default)]
    pub env_cmd: Option<String>,
}

impl LocalConfig {
    /// Create a local config rooted at `/tmp`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_path: default_tmp_root(),
            env_cmd: None,
        }
    }

    /// Set root directory
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root_path = root.into();
        self
    }

    /// Set environment-setup command
    #[must_use]
    pub fn with_env_cmd(mut self, env_cmd: impl Into<String>) -> Self {
        self.env_cmd = Some(env_cmd.into());
        self
    }
}

/// Configuration for a device reached through the `adb` bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbConfig {
    /// Target name
    #[serde(default = "default_adb_name")]
    pub name: String,
    /// Base directory on the device
    #[serde(default = "default_adb_root")]
    pub root_path: String,
    /// Serial of the device to use; `None` selects the default device
    #[serde(default)]
    pub device_id: Option<String>,
    /// Command prepended to every executed command
    #[serde(default)]
    pub env_cmd: Option<String>,
    /// Path to the adb executable
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    /// Upper bound for each adb invocation
    #[serde(
        rename = "process_timeout_secs",
        default = "default_process_timeout",
        with = "secs"
    )]
    pub process_timeout: Duration,
}

impl AdbConfig {
    /// Set device serial
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Set adb executable path
    #[must_use]
    pub fn with_adb_path(mut self, path: impl Into<String>) -> Self {
        self.adb_path = path.into();
        self
    }

    /// Set root directory
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root_path = root.into();
        self
    }

    /// Set environment-setup command
    #[must_use]
    pub fn with_env_cmd(mut self, env_cmd: impl Into<String>) -> Self {
        self.env_cmd = Some(env_cmd.into());
        self
    }

    /// Set process timeout
    #[must_use]
    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            name: default_adb_name(),
            root_path: default_adb_root(),
            device_id: None,
            env_cmd: None,
            adb_path: default_adb_path(),
            process_timeout: default_process_timeout(),
        }
    }
}

/// Configuration for a remote host reached over SSH
#[derive(Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Target name
    pub name: String,
    /// Base directory on the remote host
    #[serde(default = "default_tmp_root")]
    pub root_path: String,
    /// Host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH user (defaults to root)
    #[serde(default = "default_user")]
    pub username: String,
    /// Password, used only when no key file is configured
    #[serde(default)]
    pub password: Option<String>,
    /// Path to SSH private key (takes precedence over password)
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Command prepended to every executed command
    #[serde(default)]
    pub env_cmd: Option<String>,
    /// TCP connect timeout
    #[serde(
        rename = "connect_timeout_secs",
        default = "default_connect_timeout",
        with = "secs"
    )]
    pub connect_timeout: Duration,
    /// Allowance for banner exchange and authentication
    #[serde(
        rename = "banner_timeout_secs",
        default = "default_banner_timeout",
        with = "secs"
    )]
    pub banner_timeout: Duration,
    /// Timeout for each SCP read or write
    #[serde(
        rename = "copy_timeout_secs",
        default = "default_copy_timeout",
        with = "secs"
    )]
    pub copy_timeout: Duration,
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("name", &self.name)
            .field("root_path", &self.root_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .field("env_cmd", &self.env_cmd)
            .finish_non_exhaustive()
    }
}

impl SshConfig {
    /// Create SSH config with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_path: default_tmp_root(),
            host: default_host(),
            port: default_port(),
            username: default_user(),
            password: None,
            key_file: None,
            env_cmd: None,
            connect_timeout: default_connect_timeout(),
            banner_timeout: default_banner_timeout(),
            copy_timeout: default_copy_timeout(),
        }
    }

    /// Set host and port
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set user
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    /// Set root directory
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root_path = root.into();
        self
    }

    /// Set environment-setup command
    #[must_use]
    pub fn with_env_cmd(mut self, env_cmd: impl Into<String>) -> Self {
        self.env_cmd = Some(env_cmd.into());
        self
    }

    /// Set connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set banner and authentication timeout
    #[must_use]
    pub fn with_banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = timeout;
        self
    }

    /// Set per read/write SCP timeout
    #[must_use]
    pub fn with_copy_timeout(mut self, timeout: Duration) -> Self {
        self.copy_timeout = timeout;
        self
    }
}

/// Timeouts are written as (possibly fractional) seconds in config files
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

fn default_tmp_root() -> String {
    "/tmp".to_string()
}

fn default_adb_name() -> String {
    "adb".to_string()
}

fn default_adb_root() -> String {
    "/data/local/tmp".to_string()
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_process_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_banner_timeout() -> Duration {
    Duration::from_secs(200)
}

fn default_copy_timeout() -> Duration {
    Duration::from_secs(15)
}
