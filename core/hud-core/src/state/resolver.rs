//! Path resolution: which candidate root does a path belong to?
//!
//! Used wherever a path reported by some writer (session record, lock, shell cwd)
//! has to be attached to one of several roots. Ranking, highest first:
//!
//! 1. Specificity. An exact match beats a nested one, and among nested matches a
//!    deeper root beats a shallower one. A candidate that is only an *ancestor*
//!    of the path's root never matches: `/repo` activity is not `/repo/sub` activity.
//! 2. Freshness. Newest timestamp wins; a missing timestamp ranks last.
//! 3. Lexical order of the candidate root, smallest first.
//!
//! Remaining ties keep the first candidate in iteration order.
//!
//! Given roots `/a` and `/a/b`, the path `/a/b/c` resolves to `/a/b` even if `/a`
//! is newer. Specificity is never traded for freshness.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::path_utils::{normalize_path_for_matching, path_depth, relate_normalized, PathRelation};

/// How closely a root matches a path. Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// The path lives under the root; the value is the root's depth.
    Nested(usize),
    Exact,
}

/// Specificity of `root` for `path`, or `None` when the root does not contain the path.
pub fn specificity(path: &str, root: &str) -> Option<Specificity> {
    let path = normalize_path_for_matching(path);
    let root = normalize_path_for_matching(root);
    match relate_normalized(&path, &root) {
        PathRelation::Exact => Some(Specificity::Exact),
        PathRelation::Descendant => Some(Specificity::Nested(path_depth(&root))),
        PathRelation::Ancestor | PathRelation::Unrelated => None,
    }
}

struct Ranked<'a, T> {
    item: &'a T,
    specificity: Specificity,
    timestamp: Option<DateTime<Utc>>,
    root: String,
}

impl<T> Ranked<'_, T> {
    /// `Greater` means `self` is the better match.
    fn compare(&self, other: &Self) -> Ordering {
        self.specificity
            .cmp(&other.specificity)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| other.root.cmp(&self.root))
    }
}

/// Picks the best candidate for `path`.
///
/// `root_of` extracts each candidate's root; `timestamp_of` its freshness.
pub fn resolve<'a, T, R, S>(
    path: &str,
    candidates: impl IntoIterator<Item = &'a T>,
    root_of: R,
    timestamp_of: S,
) -> Option<&'a T>
where
    T: 'a,
    R: Fn(&T) -> &str,
    S: Fn(&T) -> Option<DateTime<Utc>>,
{
    let mut best: Option<Ranked<'a, T>> = None;

    for item in candidates {
        let root = root_of(item);
        let Some(specificity) = specificity(path, root) else {
            continue;
        };
        let ranked = Ranked {
            item,
            specificity,
            timestamp: timestamp_of(item),
            root: normalize_path_for_matching(root),
        };

        let replace = match &best {
            None => true,
            Some(current) => ranked.compare(current) == Ordering::Greater,
        };
        if replace {
            best = Some(ranked);
        }
    }

    best.map(|ranked| ranked.item)
}

/// Picks the most specific root for `path`, ignoring freshness.
pub fn resolve_root<'a, T, R>(
    path: &str,
    candidates: impl IntoIterator<Item = &'a T>,
    root_of: R,
) -> Option<&'a T>
where
    T: 'a,
    R: Fn(&T) -> &str,
{
    resolve(path, candidates, root_of, |_| None)
}
