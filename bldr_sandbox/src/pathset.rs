use std::collections::BTreeSet;

/// An unordered set of filesystem paths. Containment is by prefix at a
/// segment boundary, so `/workspace` contains `/workspace/src/x` but not
/// `/workspacelike`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    paths: BTreeSet<String>,
}

fn normalize(path: &str) -> String {
    // Strip a single trailing slash so "/a/" and "/a" compare equal; do not
    // otherwise canonicalize (no symlink resolution — that's a filesystem
    // concern, not a set-membership one).
    if path.len() > 1 && path.ends_with('/') {
        path[..path.len() - 1].to_string()
    } else {
        path.to_string()
    }
}

fn is_prefix_at_boundary(prefix: &str, path: &str) -> bool {
    if prefix == path {
        return true;
    }
    if !path.starts_with(prefix) {
        return false;
    }
    let prefix = prefix.trim_end_matches('/');
    path.as_bytes().get(prefix.len()) == Some(&b'/')
}

impl PathSet {
    pub fn new() -> Self {
        PathSet::default()
    }

    pub fn from_iter(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        PathSet {
            paths: paths.into_iter().map(|p| normalize(&p.into())).collect(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(normalize(&path.into()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|s| s.as_str())
    }

    /// True if `path` equals, or is a segment-boundary descendant of, any
    /// member of this set.
    pub fn contains_path(&self, path: &str) -> bool {
        let path = normalize(path);
        self.paths.iter().any(|p| is_prefix_at_boundary(p, &path))
    }

    pub fn union(&self, other: &PathSet) -> PathSet {
        PathSet {
            paths: self.paths.union(&other.paths).cloned().collect(),
        }
    }

    /// Every path (in either set) for which the other set contains it, or
    /// vice versa, under prefix-at-boundary containment.
    pub fn intersection(&self, other: &PathSet) -> PathSet {
        let mut out = BTreeSet::new();
        for p in &self.paths {
            if other.contains_path(p) {
                out.insert(p.clone());
            }
        }
        for p in &other.paths {
            if self.contains_path(p) {
                out.insert(p.clone());
            }
        }
        PathSet { paths: out }
    }

    pub fn is_disjoint(&self, other: &PathSet) -> bool {
        self.intersection(other).is_empty()
    }

    /// The first overlapping path between `self` and `other`, if any, for
    /// error-reporting purposes.
    pub fn first_intersection(&self, other: &PathSet) -> Option<String> {
        self.intersection(other).paths.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_at_boundary_not_substring() {
        let mut s = PathSet::new();
        s.insert("/workspace");
        assert!(s.contains_path("/workspace/src/x"));
        assert!(!s.contains_path("/workspacelike"));
        assert!(s.contains_path("/workspace"));
    }

    #[test]
    fn disjoint_sets_have_empty_intersection() {
        let a = PathSet::from_iter(["/a", "/b"]);
        let b = PathSet::from_iter(["/c"]);
        assert!(a.is_disjoint(&b));

        let c = PathSet::from_iter(["/a/sub"]);
        assert!(!a.is_disjoint(&c));
        assert_eq!(a.first_intersection(&c), Some("/a/sub".to_string()));
    }
}
