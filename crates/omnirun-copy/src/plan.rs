//! Transfer planning: destination templating and subtree analysis

use omnirun_exec::FileEntry;

/// Placeholder substituted with the matched file's base name
pub const NAME_TOKEN: &str = "{name}";

/// One planned source → destination pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    /// Path on the source target
    pub source: String,
    /// Path on the destination target
    pub dest: String,
}

/// Whether a destination spells "copy into me" by trailing separator
#[must_use]
pub fn is_dir_like(dest: &str) -> bool {
    dest.ends_with('/') || dest.ends_with('\\')
}

/// Whether a destination carries the `{name}` placeholder
#[must_use]
pub fn has_name_token(dest: &str) -> bool {
    dest.contains(NAME_TOKEN)
}

/// Compute the destination path for one matched file
///
/// `{name}` is replaced with the file's complete base name (stem and
/// extension); otherwise the name is appended under the destination
/// directory.
#[must_use]
pub fn render_dest(dest: &str, file_name: &str) -> String {
    if has_name_token(dest) {
        return dest.replace(NAME_TOKEN, file_name);
    }
    if is_dir_like(dest) {
        return format!("{dest}{file_name}");
    }
    format!("{}/{file_name}", dest.trim_end_matches('/'))
}

/// Join a destination root and a source-relative path
#[must_use]
pub fn join_under(root: &str, rel: &str) -> String {
    if root.is_empty() {
        return rel.to_string();
    }
    format!("{}/{}", root.trim_end_matches('/'), rel)
}

/// Directory paths of a listed subtree, shallowest first
///
/// Recreating these before any file lands keeps empty directories in the
/// reproduced tree.
#[must_use]
pub fn subtree_dirs(entries: &[FileEntry]) -> Vec<String> {
    let mut dirs: Vec<String> = entries
        .iter()
        .filter(|e| e.is_dir)
        .map(|e| e.path.trim_end_matches('/').to_string())
        .collect();
    dirs.sort_by_key(|d| d.matches('/').count());
    dirs
}
