use std::collections::BTreeSet;

pub const ROOT: &str = "/";

/// Normalize a tree path: leading `/`, no empty segments, no trailing `/`.
pub fn normalize(path: &str) -> String {
    let joined = segments(path).collect::<Vec<_>>().join("/");
    format!("/{}", joined)
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parent of `path`, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => Some(ROOT),
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// `true` if `ancestor` is a proper ancestor of `path`.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == path {
        return false;
    }
    if ancestor == ROOT {
        return path.starts_with('/');
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Ancestors of `path` from the nearest parent up to the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent(path), |p| parent(*p))
}

/// Set of tree paths with ancestor-aware lookups.
///
/// Stored sorted so that the descendants of a path form one contiguous range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    paths: BTreeSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.paths.remove(path)
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// The member that covers `path`: `path` itself or its nearest ancestor member.
    pub fn covering(&self, path: &str) -> Option<&str> {
        if let Some(own) = self.paths.get(path) {
            return Some(own.as_str());
        }
        ancestors(path).find_map(|a| self.paths.get(a).map(String::as_str))
    }

    /// `true` if `path` or any of its ancestors is a member.
    pub fn covers(&self, path: &str) -> bool {
        self.covering(path).is_some()
    }

    /// Members that are proper descendants of `path`.
    pub fn descendants<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = if path == ROOT {
            ROOT.to_string()
        } else {
            format!("{}/", path)
        };
        self.paths
            .range(prefix.clone()..)
            .take_while(move |p| p.starts_with(&prefix))
            .map(String::as_str)
            .filter(move |p| *p != path)
    }

    pub fn remove_descendants(&mut self, path: &str) -> usize {
        let doomed: Vec<String> = self.descendants(path).map(str::to_owned).collect();
        for p in &doomed {
            self.paths.remove(p);
        }
        doomed.len()
    }

    /// `true` if no member is a proper ancestor of another member.
    pub fn is_canonical(&self) -> bool {
        self.paths
            .iter()
            .all(|p| ancestors(p).all(|a| !self.paths.contains(a)))
    }

    /// Drop every member already covered by another member.
    pub fn canonicalize(&mut self) {
        let redundant: Vec<String> = self
            .paths
            .iter()
            .filter(|p| ancestors(p).any(|a| self.paths.contains(a)))
            .cloned()
            .collect();
        for p in redundant {
            self.paths.remove(&p);
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for PathSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}
