//! Path normalization and root relationships.
//!
//! Matching is done on normalized strings: trailing slashes stripped (root kept),
//! and lowercased on macOS where the default filesystem is case-insensitive.
//! Symlink resolution is available for callers that accept filesystem access.

use std::path::Path;

/// Normalizes a path for comparison, resolving symlinks when the path exists.
///
/// ```ignore
/// normalize_path_for_comparison("/project/") -> "/project"
/// normalize_path_for_comparison("/")         -> "/"
/// ```
pub fn normalize_path_for_comparison(path: &str) -> String {
    let resolved = resolve_symlinks(path);
    let trimmed = strip_trailing_slashes(&resolved);
    apply_case_normalization(&trimmed)
}

/// Normalization without filesystem access. This is what every matcher uses;
/// records and locks often refer to paths that no longer exist.
pub fn normalize_path_for_matching(path: &str) -> String {
    let trimmed = strip_trailing_slashes(path);
    apply_case_normalization(&trimmed)
}

/// How a path relates to a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRelation {
    /// Same path after normalization.
    Exact,
    /// The path lives strictly under the root.
    Descendant,
    /// The path is a strict ancestor of the root. Never counts as a match.
    Ancestor,
    Unrelated,
}

/// Classifies `path` relative to `root`. Both are normalized without touching the
/// filesystem. Segment boundaries are respected: `/repo-old` is not under `/repo`.
pub fn relate(path: &str, root: &str) -> PathRelation {
    let path = normalize_path_for_matching(path);
    let root = normalize_path_for_matching(root);
    relate_normalized(&path, &root)
}

pub(crate) fn relate_normalized(path: &str, root: &str) -> PathRelation {
    if path == root {
        PathRelation::Exact
    } else if is_strictly_under(path, root) {
        PathRelation::Descendant
    } else if is_strictly_under(root, path) {
        PathRelation::Ancestor
    } else {
        PathRelation::Unrelated
    }
}

fn is_strictly_under(child: &str, parent: &str) -> bool {
    if parent == "/" {
        return child != "/" && child.starts_with('/');
    }
    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Number of path segments; `/` is 0, `/a/b` is 2.
pub fn path_depth(normalized: &str) -> usize {
    normalized.split('/').filter(|s| !s.is_empty()).count()
}

#[cfg(test)]
fn normalize_path_simple(path: &str) -> String {
    normalize_path_for_matching(path)
}

/// Strips trailing slashes from a path, preserving root "/".
pub fn strip_trailing_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn resolve_symlinks(path: &str) -> String {
    let path_obj = Path::new(path);
    if path_obj.exists() {
        if let Ok(canonical) = path_obj.canonicalize() {
            return canonical.to_string_lossy().to_string();
        }
    }

    path.to_string()
}

fn apply_case_normalization(path: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        path.to_lowercase()
    }
    #[cfg(not(target_os = "macos"))]
    {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(normalize_path_simple("/project/"), "/project");
        assert_eq!(normalize_path_simple("/project//"), "/project");
    }

    #[test]
    fn preserves_root() {
        assert_eq!(normalize_path_simple("/"), "/");
        assert_eq!(normalize_path_simple("//"), "/");
        assert_eq!(normalize_path_simple("///"), "/");
    }

    #[test]
    fn normalizes_regular_paths() {
        let result = normalize_path_simple("/Users/test/Code/project");
        #[cfg(target_os = "macos")]
        assert_eq!(result, "/users/test/code/project");
        #[cfg(not(target_os = "macos"))]
        assert_eq!(result, "/Users/test/Code/project");
    }

    #[test]
    #[cfg(target_os = "macos")]
    fn case_insensitive_on_macos() {
        // These should all normalize to the same value on macOS
        let upper = normalize_path_simple("/Users/Pete/Project");
        let lower = normalize_path_simple("/users/pete/project");
        let mixed = normalize_path_simple("/USERS/pEtE/pRoJeCt");

        assert_eq!(upper, lower);
        assert_eq!(lower, mixed);
    }

    #[test]
    fn resolves_existing_symlinks() {
        use std::fs;
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let real_dir = temp.path().join("real");
        let link_path = temp.path().join("link");

        fs::create_dir(&real_dir).unwrap();

        #[cfg(unix)]
        std::os::unix::fs::symlink(&real_dir, &link_path).unwrap();

        #[cfg(unix)]
        {
            let real_normalized = normalize_path_for_comparison(real_dir.to_str().unwrap());
            let link_normalized = normalize_path_for_comparison(link_path.to_str().unwrap());

            // Both should resolve to the same canonical path
            assert_eq!(real_normalized, link_normalized);
        }
    }

    #[test]
    fn handles_nonexistent_paths() {
        // Should not panic on non-existent paths
        let result = normalize_path_for_comparison("/this/path/does/not/exist/12345");
        #[cfg(target_os = "macos")]
        assert_eq!(result, "/this/path/does/not/exist/12345");
        #[cfg(not(target_os = "macos"))]
        assert_eq!(result, "/this/path/does/not/exist/12345");
    }

    #[test]
    fn relate_exact_ignores_trailing_slash() {
        assert_eq!(relate("/repo/", "/repo"), PathRelation::Exact);
    }

    #[test]
    fn relate_descendant_and_ancestor() {
        assert_eq!(relate("/repo/src", "/repo"), PathRelation::Descendant);
        assert_eq!(relate("/repo", "/repo/src"), PathRelation::Ancestor);
    }

    #[test]
    fn relate_respects_segment_boundaries() {
        assert_eq!(relate("/repo-old", "/repo"), PathRelation::Unrelated);
        assert_eq!(relate("/other", "/repo"), PathRelation::Unrelated);
    }

    #[test]
    fn relate_root_contains_everything() {
        assert_eq!(relate("/anything", "/"), PathRelation::Descendant);
        assert_eq!(relate("/", "/"), PathRelation::Exact);
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(path_depth("/"), 0);
        assert_eq!(path_depth("/a/b"), 2);
    }

}
