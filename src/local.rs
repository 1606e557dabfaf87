//! Directory source over a local filesystem root.
//!
//! Ids are `fs:` followed by the tree path, so a node can be resolved
//! without a prior listing.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::error::{PickerError, Result};
use crate::memory::{NodeResolver, SharedResolver};
use crate::model::{Page, ResourceNode};
use crate::path_set::{self, ROOT};
use crate::source::DirectorySource;

const ID_PREFIX: &str = "fs:";

#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
    types: Vec<String>,
    include_ignored: bool,
    page_size: usize,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            types: Vec::new(),
            include_ignored: false,
            page_size: 100,
        }
    }

    /// Only list files with one of these extensions (no dot). Folders are
    /// always listed.
    pub fn with_types(mut self, types: Vec<String>) -> Self {
        self.types = types;
        self
    }

    /// Also list files excluded by `.gitignore` and `.ignore`.
    pub fn include_ignored(mut self, include: bool) -> Self {
        self.include_ignored = include;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolver(self: &Arc<Self>) -> SharedResolver {
        Arc::clone(self) as SharedResolver
    }

    pub fn id_for(path: &str) -> String {
        format!("{ID_PREFIX}{}", path_set::normalize(path))
    }

    /// Filesystem location of a tree path, refusing anything that would
    /// leave the root.
    fn locate(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    fn tree_path(&self, fs_path: &Path) -> Option<String> {
        let relative = fs_path.strip_prefix(&self.root).ok()?;
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(path_set::normalize(&joined))
    }

    /// One level of `dir`, sorted by path.
    fn scan(&self, dir: &Path) -> Vec<ResourceNode> {
        let mut walker = WalkBuilder::new(dir);
        walker.max_depth(Some(1));
        if self.include_ignored {
            walker.git_ignore(false).ignore(false);
        }

        let mut nodes = Vec::new();
        for result in walker.build() {
            let dirent = match result {
                Ok(v) => v,
                Err(e) => {
                    warn!("skipping entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if dirent.depth() == 0 {
                continue;
            }

            let fs_path = dirent.into_path();
            let is_dir = fs_path.is_dir();
            if !self.types.is_empty() && !is_dir {
                let keep = self
                    .types
                    .iter()
                    .any(|ext| fs_path.extension() == Some(OsStr::new(ext)));
                if !keep {
                    continue;
                }
            }
            let Some(path) = self.tree_path(&fs_path) else {
                continue;
            };
            let id = Self::id_for(&path);
            nodes.push(if is_dir {
                ResourceNode::dir(id, path)
            } else {
                ResourceNode::file(id, path)
            });
        }

        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        nodes.dedup_by(|a, b| a.path == b.path);
        nodes
    }

    fn folder_path(&self, folder_id: Option<&str>) -> Result<String> {
        match folder_id {
            None => Ok(ROOT.to_string()),
            Some(id) => id
                .strip_prefix(ID_PREFIX)
                .map(path_set::normalize)
                .ok_or_else(|| PickerError::not_found(id)),
        }
    }
}

impl NodeResolver for LocalDirectory {
    fn by_id(&self, id: &str) -> Option<ResourceNode> {
        self.by_path(&path_set::normalize(id.strip_prefix(ID_PREFIX)?))
    }

    fn by_path(&self, path: &str) -> Option<ResourceNode> {
        let fs_path = self.locate(path)?;
        let meta = std::fs::metadata(&fs_path).ok()?;
        let path = path_set::normalize(path);
        let id = Self::id_for(&path);
        Some(if meta.is_dir() {
            ResourceNode::dir(id, path)
        } else {
            ResourceNode::file(id, path)
        })
    }
}

#[async_trait]
impl DirectorySource for LocalDirectory {
    async fn list_children(
        &self,
        folder_id: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Page<ResourceNode>> {
        let path = self.folder_path(folder_id)?;
        let dir = self
            .locate(&path)
            .filter(|p| p.is_dir())
            .ok_or_else(|| PickerError::not_found(path.clone()))?;

        let this = self.clone();
        let nodes = tokio::task::spawn_blocking(move || this.scan(&dir))
            .await
            .map_err(PickerError::server)?;
        debug!("scanned {} ({} entries)", path, nodes.len());
        Page::at_offset(&nodes, cursor, self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::list_all_children;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("notes.txt"), "notes").unwrap();
        fs::write(root.join("build.log"), "log").unwrap();
        fs::write(root.join("src/lib.rs"), "").unwrap();
        fs::write(root.join("src/nested/deep.rs"), "").unwrap();
        fs::write(root.join(".ignore"), "*.log\n").unwrap();
        tmp
    }

    fn paths(nodes: &[ResourceNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.path.as_str()).collect()
    }

    #[tokio::test]
    async fn lists_one_level_honoring_ignore_files() {
        let tmp = fixture();
        let source = LocalDirectory::new(tmp.path());
        let root = list_all_children(&source, None).await.unwrap();
        assert_eq!(paths(&root), vec!["/main.rs", "/notes.txt", "/src"]);
        assert!(root[2].kind.is_dir());
        assert_eq!(root[2].id, "fs:/src");

        let src = list_all_children(&source, Some("fs:/src")).await.unwrap();
        assert_eq!(paths(&src), vec!["/src/lib.rs", "/src/nested"]);
    }

    #[tokio::test]
    async fn include_ignored_and_type_filter() {
        let tmp = fixture();
        let all = LocalDirectory::new(tmp.path()).include_ignored(true);
        let root = list_all_children(&all, None).await.unwrap();
        assert!(paths(&root).contains(&"/build.log"));

        let rust_only = LocalDirectory::new(tmp.path()).with_types(vec!["rs".to_string()]);
        let root = list_all_children(&rust_only, None).await.unwrap();
        assert_eq!(paths(&root), vec!["/main.rs", "/src"]);
    }

    #[tokio::test]
    async fn unknown_or_escaping_folders_are_not_found() {
        let tmp = fixture();
        let source = LocalDirectory::new(tmp.path());
        for id in ["fs:/missing", "fs:/main.rs", "fs:/../etc", "other:/src"] {
            assert!(
                matches!(
                    source.list_children(Some(id), None).await,
                    Err(PickerError::NotFound(_))
                ),
                "{id}"
            );
        }
    }

    #[test]
    fn resolves_ids_without_listing() {
        let tmp = fixture();
        let source = LocalDirectory::new(tmp.path());
        let node = source.by_id("fs:/src/nested/deep.rs").unwrap();
        assert_eq!(node.path, "/src/nested/deep.rs");
        assert!(!node.kind.is_dir());
        assert!(source.by_path("/src/nested").unwrap().kind.is_dir());
        assert!(source.by_id("fs:/nope.rs").is_none());
    }
}
