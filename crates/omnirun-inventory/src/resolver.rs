//! Specifier and endpoint resolution
//!
//! Grammar: `local` (or the empty string) names the local machine;
//! `group.name` names one inventory entry; `group.*` or `group.web-?` expand
//! with shell-glob semantics over the entry names of that group. Results come
//! back in inventory declaration order.

use globset::{Glob, GlobMatcher};
use tracing::debug;

use crate::error::ResolveError;
use crate::types::{Inventory, Target};

/// One side of a copy operation: a target plus a path on it
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// The machine the path lives on
    pub target: Target,
    /// Path on that machine
    pub path: String,
}

impl Endpoint {
    /// Whether the path is on the local machine
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.target.is_local()
    }
}

/// Whether a name pattern contains glob metacharacters
#[must_use]
pub fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

fn compile(pattern: &str) -> Result<GlobMatcher, ResolveError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| ResolveError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

impl Inventory {
    /// Resolve a specifier into one or more targets
    ///
    /// A glob that matches nothing (or names an unknown group) resolves to an
    /// empty list; callers decide whether that is an error. An explicit
    /// single name that is absent is always an error.
    ///
    /// # Errors
    /// Returns [`ResolveError::InvalidSpecifier`] for strings outside the
    /// grammar and [`ResolveError::NotFound`] for an absent explicit name.
    pub fn resolve(&self, spec: &str) -> Result<Vec<Target>, ResolveError> {
        let spec = spec.trim();
        if spec.is_empty() || spec == "local" {
            return Ok(vec![Target::local()]);
        }

        let Some((group, name)) = spec.split_once('.') else {
            return Err(ResolveError::InvalidSpecifier(spec.to_string()));
        };
        if group.is_empty() || name.is_empty() {
            return Err(ResolveError::InvalidSpecifier(spec.to_string()));
        }

        if is_pattern(name) {
            let matcher = compile(name)?;
            let Some(group) = self.group(group) else {
                debug!(spec, "unknown group, resolving to empty set");
                return Ok(Vec::new());
            };
            let targets: Vec<Target> = group
                .entries()
                .filter(|(entry, _)| matcher.is_match(entry))
                .map(|(entry, config)| Target::from_entry(&group.name, entry, config.clone()))
                .collect();
            debug!(spec, count = targets.len(), "resolved pattern");
            Ok(targets)
        } else {
            self.get(group, name)
                .map(|t| vec![t])
                .ok_or_else(|| ResolveError::NotFound(spec.to_string()))
        }
    }

    /// Non-erroring variant of [`Inventory::resolve`] for listings
    ///
    /// Absent names and invalid specifiers resolve to an empty list.
    #[must_use]
    pub fn find(&self, pattern: &str) -> Vec<Target> {
        self.resolve(pattern).unwrap_or_default()
    }

    /// Parse a `prefix:path` endpoint string
    ///
    /// Only `local:` or `<declared-group>.<name>:` is treated as a target
    /// prefix. Anything else, including drive-letter paths like `C:\tmp`,
    /// is a path on the local machine. A target prefix must name exactly one
    /// target; a glob matching several entries is rejected.
    ///
    /// # Errors
    /// Returns [`ResolveError::NotFound`] when a recognized prefix matches no
    /// target and [`ResolveError::Ambiguous`] when it matches more than one.
    pub fn parse_endpoint(&self, raw: &str) -> Result<Endpoint, ResolveError> {
        if let Some((prefix, path)) = raw.split_once(':') {
            if prefix == "local" {
                return Ok(Endpoint {
                    target: Target::local(),
                    path: path.to_string(),
                });
            }
            if let Some(target) = self.endpoint_target(prefix)? {
                return Ok(Endpoint {
                    target,
                    path: path.to_string(),
                });
            }
        }
        Ok(Endpoint {
            target: Target::local(),
            path: raw.to_string(),
        })
    }

    /// Resolve an endpoint prefix, or `None` if it does not look like one
    fn endpoint_target(&self, prefix: &str) -> Result<Option<Target>, ResolveError> {
        // A path fragment is never a prefix.
        if prefix.contains(['/', '\\']) {
            return Ok(None);
        }
        let Some((group, _)) = prefix.split_once('.') else {
            return Ok(None);
        };
        if !self.is_group_name(group) {
            return Ok(None);
        }

        let mut targets = self.resolve(prefix)?;
        match targets.len() {
            0 => Err(ResolveError::NotFound(prefix.to_string())),
            1 => Ok(Some(targets.remove(0))),
            _ => Err(ResolveError::Ambiguous(prefix.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendConfig, DockerConfig, SshConfig, TargetKind};

    fn sample_inventory() -> Inventory {
        let mut inv = Inventory::new();
        inv.add_host("web-1", SshConfig::new("10.0.0.1", "deploy"));
        inv.add_host("web-2", SshConfig::new("10.0.0.2", "deploy"));
        inv.add_host("db-1", SshConfig::new("10.0.0.3", "deploy"));
        inv.add_container("app", DockerConfig::new("my-app"));
        inv
    }

    #[test]
    fn resolve_local() {
        let inv = sample_inventory();
        let targets = inv.resolve("local").unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_local());

        let targets = inv.resolve("").unwrap();
        assert!(targets[0].is_local());
    }

    #[test]
    fn resolve_single_name() {
        let inv = sample_inventory();
        let targets = inv.resolve("hosts.web-1").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "hosts.web-1");
        assert_eq!(targets[0].kind, TargetKind::Ssh);
    }

    #[test]
    fn resolve_missing_name_is_error() {
        let inv = sample_inventory();
        let err = inv.resolve("hosts.web-9").unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn find_pattern_in_declared_order() {
        let inv = sample_inventory();
        let ids: Vec<_> = inv.find("hosts.web-*").into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["hosts.web-1", "hosts.web-2"]);
    }

    #[test]
    fn find_star_matches_whole_group() {
        let inv = sample_inventory();
        assert_eq!(inv.find("hosts.*").len(), 3);
    }

    #[test]
    fn question_mark_matches_one_character() {
        let inv = sample_inventory();
        let ids: Vec<_> = inv.find("hosts.db-?").into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["hosts.db-1"]);
        assert!(inv.find("hosts.db-??").is_empty());
    }

    #[test]
    fn unknown_group_pattern_resolves_empty() {
        let inv = sample_inventory();
        assert!(inv.resolve("nodes.*").unwrap().is_empty());
        assert!(inv.resolve("hosts.cache-*").unwrap().is_empty());
    }

    #[test]
    fn bare_word_is_invalid() {
        let inv = sample_inventory();
        assert!(matches!(
            inv.resolve("web-1"),
            Err(ResolveError::InvalidSpecifier(_))
        ));
    }

    #[test]
    fn endpoint_with_group_prefix() {
        let inv = sample_inventory();
        let ep = inv.parse_endpoint("hosts.web-1:/var/log/app.log").unwrap();
        assert_eq!(ep.target.id, "hosts.web-1");
        assert_eq!(ep.path, "/var/log/app.log");
    }

    #[test]
    fn endpoint_local_prefix() {
        let inv = sample_inventory();
        let ep = inv.parse_endpoint("local:/tmp/out.txt").unwrap();
        assert!(ep.is_local());
        assert_eq!(ep.path, "/tmp/out.txt");
    }

    #[test]
    fn endpoint_without_prefix_is_local_path() {
        let inv = sample_inventory();
        let ep = inv.parse_endpoint("src/main.rs").unwrap();
        assert!(ep.is_local());
        assert_eq!(ep.path, "src/main.rs");
    }

    #[test]
    fn drive_letter_path_is_local() {
        let inv = sample_inventory();
        let ep = inv.parse_endpoint(r"C:\temp\file.txt").unwrap();
        assert!(ep.is_local());
        assert_eq!(ep.path, r"C:\temp\file.txt");
    }

    #[test]
    fn unknown_prefix_is_local_path() {
        let inv = sample_inventory();
        let ep = inv.parse_endpoint("notes.txt:backup").unwrap();
        assert!(ep.is_local());
        assert_eq!(ep.path, "notes.txt:backup");
    }

    #[test]
    fn endpoint_missing_entry_is_error() {
        let inv = sample_inventory();
        assert!(matches!(
            inv.parse_endpoint("hosts.web-9:/tmp/x"),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[test]
    fn endpoint_glob_matching_many_is_ambiguous() {
        let inv = sample_inventory();
        assert!(matches!(
            inv.parse_endpoint("hosts.web-*:/tmp/x"),
            Err(ResolveError::Ambiguous(_))
        ));
    }

    #[test]
    fn user_defined_group_prefix_is_recognized() {
        let mut inv = sample_inventory();
        inv.add("build", "runner", BackendConfig::Docker(DockerConfig::new("ci-runner")));
        let ep = inv.parse_endpoint("build.runner:/workspace").unwrap();
        assert_eq!(ep.target.id, "build.runner");
    }
}
