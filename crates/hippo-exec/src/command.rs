//! Shell command composition for target shells

/// Quote a string for a POSIX shell
#[must_use]
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".into()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// Build `cd <dir> && [<env_cmd> ]<command>`.
///
/// A failing `cd` stops the chain, so nothing ever runs in a fallback directory.
#[must_use]
pub fn compose(dir: &str, env_cmd: Option<&str>, command: &str) -> String {
    format!(
        "cd {} && {}",
        shell_quote(dir),
        with_env(env_cmd, command)
    )
}

/// Prefix `command` with the environment-setup command, if there is one
#[must_use]
pub fn with_env(env_cmd: Option<&str>, command: &str) -> String {
    match env_cmd.map(str::trim).filter(|e| !e.is_empty()) {
        Some(env) => format!("{env} {command}"),
        None => command.to_string(),
    }
}

/// `mkdir -p` for a resolved target directory
#[must_use]
pub fn mkdir_p(dir: &str) -> String {
    format!("mkdir -p {}", shell_quote(dir))
}
