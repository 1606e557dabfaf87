//! Resolve selected paths to the flat list of file ids a rebuild needs.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::error::{PickerError, Result};
use crate::merge::{FolderRef, TreeMerger};
use crate::model::ResourceNode;
use crate::path_set::{self, ROOT};
use crate::source;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub id: String,
    pub path: String,
}

impl From<&ResourceNode> for FileRef {
    fn from(node: &ResourceNode) -> Self {
        Self {
            id: node.id.clone(),
            path: node.path.clone(),
        }
    }
}

pub struct PathExpander {
    merger: Arc<TreeMerger>,
}

impl PathExpander {
    pub fn new(merger: Arc<TreeMerger>) -> Self {
        Self { merger }
    }

    /// Node at `path`, from the registry when it has been seen, otherwise by
    /// listing each segment in turn from the root.
    pub async fn resolve(&self, path: &str) -> Result<ResourceNode> {
        let path = path_set::normalize(path);
        if let Some(node) = self.merger.registry().get(&path) {
            return Ok(node);
        }
        if path == ROOT {
            return Err(PickerError::not_found(path));
        }

        let mut folder = FolderRef::root();
        let mut prefix = String::new();
        let segments: Vec<&str> = path_set::segments(&path).collect();
        for (i, segment) in segments.iter().enumerate() {
            prefix = path_set::join(if i == 0 { ROOT } else { &prefix }, segment);
            let children = self.merger.children(&folder).await?;
            let node = children
                .iter()
                .find(|n| n.path == prefix)
                .cloned()
                .ok_or_else(|| PickerError::not_found(path.clone()))?;
            if i + 1 == segments.len() {
                return Ok(node);
            }
            if !node.kind.is_dir() {
                return Err(PickerError::not_found(path.clone()));
            }
            folder = FolderRef::of(&node);
        }
        Err(PickerError::not_found(path))
    }

    /// Every file under the selected paths. One unresolvable path fails the
    /// whole expansion.
    pub async fn expand(&self, selected: &[String]) -> Result<Vec<FileRef>> {
        let per_path = try_join_all(selected.iter().map(|p| self.expand_one(p))).await?;

        let mut seen = HashSet::new();
        let files: Vec<FileRef> = per_path
            .into_iter()
            .flatten()
            .filter(|f| seen.insert(f.id.clone()))
            .collect();
        debug!("expanded {} paths into {} files", selected.len(), files.len());
        Ok(files)
    }

    pub async fn expand_ids(&self, selected: &[String]) -> Result<Vec<String>> {
        Ok(self.expand(selected).await?.into_iter().map(|f| f.id).collect())
    }

    async fn expand_one(&self, path: &str) -> Result<Vec<FileRef>> {
        let path = path_set::normalize(path);
        if path == ROOT {
            return self.files_under(FolderRef::root()).await;
        }
        let node = self.resolve(&path).await?;
        if node.kind.is_dir() {
            self.files_under(FolderRef::of(&node)).await
        } else {
            Ok(vec![FileRef::from(&node)])
        }
    }

    /// Breadth-first: folders of one depth are listed concurrently.
    async fn files_under(&self, folder: FolderRef) -> Result<Vec<FileRef>> {
        let mut files = Vec::new();
        let mut level = vec![folder];
        while !level.is_empty() {
            let listings = try_join_all(level.iter().map(|f| self.merger.children(f))).await?;
            let mut next = Vec::new();
            for node in listings.iter().flat_map(|l| l.iter()) {
                if node.kind.is_dir() {
                    next.push(FolderRef::of(node));
                } else {
                    files.push(FileRef::from(node));
                }
            }
            level = next;
        }
        Ok(files)
    }

    /// Paths of every file currently in `index_id`, read breadth-first from
    /// the index source, bypassing the cache.
    pub async fn indexed_files(&self, index_id: &str) -> Result<Vec<String>> {
        let index = self.merger.index_source();
        let mut files = Vec::new();
        let mut level = vec![ROOT.to_string()];
        while !level.is_empty() {
            let listings = try_join_all(level.iter().map(|path| async move {
                match source::list_all_indexed(index.as_ref(), index_id, path).await {
                    Err(PickerError::NotFound(_)) => Ok(Vec::new()),
                    other => other,
                }
            }))
            .await?;
            let mut next = Vec::new();
            for entry in listings.into_iter().flatten() {
                let path = path_set::normalize(&entry.node.path);
                if entry.node.kind.is_dir() {
                    next.push(path);
                } else {
                    files.push(path);
                }
            }
            level = next;
        }
        Ok(files)
    }
}
