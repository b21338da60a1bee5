//! Target path resolution
//!
//! Every backend addresses a POSIX-like filesystem, so paths are joined and
//! normalised the same way regardless of the host OS.

/// Join `relative` onto a target's `root` and normalise separators to `/`.
///
/// An absolute `relative` replaces the root. An empty or `.` relative path
/// resolves to the root itself. No validation is done here; bad paths are
/// rejected by whatever consumes them.
#[must_use]
pub fn resolve(root: &str, relative: &str) -> String {
    let joined = if relative.is_empty() || relative == "." {
        root.to_string()
    } else if root.is_empty() || is_absolute(relative) {
        relative.to_string()
    } else if root.ends_with('/') || root.ends_with('\\') {
        format!("{root}{relative}")
    } else {
        format!("{root}/{relative}")
    };

    joined.replace('\\', "/")
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    match bytes {
        [b'/' | b'\\', ..] => true,
        // Windows drive prefix, e.g. `C:\` or `C:/`
        [drive, b':', b'/' | b'\\', ..] => drive.is_ascii_alphabetic(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_joins_root() {
        assert_eq!(resolve("/tmp", "dest_folder"), "/tmp/dest_folder");
        assert_eq!(resolve("/tmp/", "a/b"), "/tmp/a/b");
        assert_eq!(
            resolve("/data/local/tmp", "dest/test_file.txt"),
            "/data/local/tmp/dest/test_file.txt"
        );
    }

    #[test]
    fn test_resolve_current_dir_is_root() {
        assert_eq!(resolve("/tmp", "."), "/tmp");
        assert_eq!(resolve("/tmp", ""), "/tmp");
    }

    #[test]
    fn test_resolve_absolute_relative_replaces_root() {
        assert_eq!(resolve("/tmp", "/var/log"), "/var/log");
        assert_eq!(resolve("/tmp", "D:\\work"), "D:/work");
    }

    #[test]
    fn test_resolve_normalizes_backslashes() {
        let resolved = resolve("C:\\tmp", "a\\b");
        assert_eq!(resolved, "C:/tmp/a/b");
        assert!(!resolved.contains('\\'));
        assert_eq!(resolve("C:\\tmp\\", "a\\b"), "C:/tmp/a/b");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let first = resolve("C:\\tmp", "x\\y");
        let second = resolve("C:\\tmp", "x\\y");
        assert_eq!(first, second);
        // resolving an already-normalised path against an empty root is a no-op
        assert_eq!(resolve("", &first), first);
    }
}
