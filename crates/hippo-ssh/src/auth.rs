//! SSH authentication method resolution

use std::fmt;
use std::path::{Path, PathBuf};

use hippo_exec::SshConfig;
use tracing::warn;

/// How to authenticate against the remote host
#[derive(Clone)]
pub enum AuthMethod {
    /// Private key file
    KeyFile(PathBuf),
    /// Plain password
    Password(String),
}

impl AuthMethod {
    /// Pick the authentication method for a target.
    ///
    /// A configured key file always wins over a password.
    ///
    /// # Errors
    /// Returns `AuthError` if neither is configured or the key file is missing
    pub fn from_config(config: &SshConfig) -> Result<Self, AuthError> {
        if let Some(path) = &config.key_file {
            if !path.exists() {
                return Err(AuthError::NotFound(path.display().to_string()));
            }
            if let Err(e) = validate_key_permissions(path) {
                warn!(error = %e, "continuing with SSH key");
            }
            return Ok(AuthMethod::KeyFile(path.clone()));
        }

        match &config.password {
            Some(password) => Ok(AuthMethod::Password(password.clone())),
            None => Err(AuthError::NoMethod),
        }
    }

    /// Short label for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::KeyFile(_) => "public key",
            AuthMethod::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            AuthMethod::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

/// Authentication resolution errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("neither key file nor password configured")]
    NoMethod,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(unix)]
fn validate_key_permissions(path: &Path) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();

    // group and other bits must be clear
    if mode & 0o77 != 0 {
        return Err(AuthError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_key_permissions(_path: &Path) -> Result<(), AuthError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_takes_precedence() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let config = SshConfig::new("box")
            .with_password("secret")
            .with_key_file(key.path());

        let method = AuthMethod::from_config(&config).unwrap();
        assert!(matches!(method, AuthMethod::KeyFile(ref p) if p == key.path()));
        assert_eq!(method.kind(), "public key");
    }

    #[test]
    fn test_password_fallback() {
        let config = SshConfig::new("box").with_password("secret");
        let method = AuthMethod::from_config(&config).unwrap();

        assert!(matches!(method, AuthMethod::Password(ref p) if p == "secret"));
        assert!(!format!("{method:?}").contains("secret"));
    }

    #[test]
    fn test_no_method() {
        let config = SshConfig::new("box");
        assert!(matches!(
            AuthMethod::from_config(&config),
            Err(AuthError::NoMethod)
        ));
    }

    #[test]
    fn test_missing_key_file() {
        let config = SshConfig::new("box").with_key_file("/nonexistent/id_ed25519");
        assert!(matches!(
            AuthMethod::from_config(&config),
            Err(AuthError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_permissions_detected() {
        use std::os::unix::fs::PermissionsExt;

        let key = tempfile::NamedTempFile::new().unwrap();
        std::fs::set_permissions(key.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            validate_key_permissions(key.path()),
            Err(AuthError::BadPermissions(_))
        ));

        std::fs::set_permissions(key.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(validate_key_permissions(key.path()).is_ok());
    }
}
