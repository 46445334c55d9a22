//! Change-event filtering by glob patterns

use globset::Glob;
use tracing::warn;

/// Whether a changed path should be ignored
///
/// With a non-empty `pattern` list the file must match at least one of its
/// globs or it is ignored. A match in `exclude` ignores the file regardless
/// of `pattern`. With no patterns at all nothing is ignored.
#[must_use]
pub fn should_ignore_file(path: &str, pattern: &[String], exclude: &[String]) -> bool {
    if matches_any(exclude, path) {
        return true;
    }
    if !pattern.is_empty() && !matches_any(pattern, path) {
        return true;
    }
    false
}

fn matches_any(globs: &[String], path: &str) -> bool {
    let name = path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path);
    globs.iter().any(|raw| match Glob::new(raw) {
        Ok(glob) => {
            let matcher = glob.compile_matcher();
            matcher.is_match(name) || matcher.is_match(path)
        }
        Err(e) => {
            warn!(pattern = %raw, error = %e, "ignoring invalid glob");
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globs(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|p| (*p).to_string()).collect()
    }

    #[test]
    fn unmatched_pattern_ignores_file() {
        assert!(should_ignore_file(
            "test.log",
            &globs(&["*.js", "*.ts"]),
            &[]
        ));
    }

    #[test]
    fn matched_pattern_keeps_file() {
        assert!(!should_ignore_file("index.ts", &globs(&["*.ts"]), &[]));
    }

    #[test]
    fn no_patterns_keeps_everything() {
        assert!(!should_ignore_file("anything.bin", &[], &[]));
    }

    #[test]
    fn exclude_wins_over_pattern() {
        assert!(should_ignore_file(
            "generated.ts",
            &globs(&["*.ts"]),
            &globs(&["generated.*"])
        ));
    }

    #[test]
    fn nested_paths_match_by_file_name() {
        assert!(!should_ignore_file(
            "src/deep/module.ts",
            &globs(&["*.ts"]),
            &[]
        ));
        assert!(should_ignore_file(
            "src/deep/module.ts",
            &globs(&["*.ts"]),
            &globs(&["module.ts"])
        ));
    }
}
