//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

const CRATES: [&str; 3] = ["hippo", "hippo_exec", "hippo_ssh"];

/// Filter directive enabling `level` for the hippo crates only
#[must_use]
pub fn default_directive(level: &str) -> String {
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `level` when set. Returns `false` if a subscriber
/// was already installed.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(
            default_directive("debug"),
            "hippo=debug,hippo_exec=debug,hippo_ssh=debug"
        );
    }

    #[test]
    fn test_second_init_is_harmless() {
        init("info");
        assert!(!init("debug"));
    }
}
