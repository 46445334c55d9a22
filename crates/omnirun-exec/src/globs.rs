//! Glob handling shared by the file-listing implementations

use globset::{GlobBuilder, GlobMatcher};

use crate::error::ExecError;

/// Whether a path contains glob metacharacters
#[must_use]
pub fn contains_meta(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Split a pattern into its literal base directory and the glob remainder
///
/// `src/*.txt` becomes `("src", Some("*.txt"))`; a path without
/// metacharacters comes back as `(path, None)`.
#[must_use]
pub fn split_glob(pattern: &str) -> (String, Option<String>) {
    let Some(meta) = pattern.find(['*', '?', '[']) else {
        return (pattern.to_string(), None);
    };
    match pattern[..meta].rfind('/') {
        Some(sep) => (
            pattern[..sep].to_string(),
            Some(pattern[sep + 1..].to_string()),
        ),
        None => (".".to_string(), Some(pattern.to_string())),
    }
}

/// Compile a glob that treats `/` as a literal separator
///
/// `*` and `?` never cross directory boundaries; `**` does.
pub fn matcher_for(pattern: &str) -> Result<GlobMatcher, ExecError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| ExecError::Io(format!("invalid glob {pattern:?}: {e}")))
}

/// Path of `entry` relative to `base`, if it is under it
#[must_use]
pub fn relative<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if base == "." {
        return Some(path.strip_prefix("./").unwrap_or(path));
    }
    path.strip_prefix(base)
        .map(|rest| rest.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_simple_glob() {
        assert_eq!(
            split_glob("src/*.txt"),
            ("src".to_string(), Some("*.txt".to_string()))
        );
    }

    #[test]
    fn split_bare_glob_uses_dot() {
        assert_eq!(
            split_glob("*.log"),
            (".".to_string(), Some("*.log".to_string()))
        );
    }

    #[test]
    fn split_deep_glob() {
        assert_eq!(
            split_glob("/var/log/**/*.log"),
            ("/var/log".to_string(), Some("**/*.log".to_string()))
        );
    }

    #[test]
    fn split_literal_path() {
        assert_eq!(split_glob("/etc/hosts"), ("/etc/hosts".to_string(), None));
    }

    #[test]
    fn star_does_not_cross_separator() {
        let m = matcher_for("*.txt").unwrap();
        assert!(m.is_match("a.txt"));
        assert!(!m.is_match("sub/a.txt"));

        let m = matcher_for("**/*.txt").unwrap();
        assert!(m.is_match("sub/a.txt"));
    }

    #[test]
    fn relative_strips_base() {
        assert_eq!(relative("/data/sub/a.txt", "/data"), Some("sub/a.txt"));
        assert_eq!(relative("./a.txt", "."), Some("a.txt"));
        assert_eq!(relative("/other/a.txt", "/data"), None);
    }
}
