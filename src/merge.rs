//! Per-folder merge of directory listings with index status.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::{CacheKey, FetchCache, SourceKind};
use crate::error::{PickerError, Result};
use crate::model::{IndexStatus, IndexedNode, MergedNode, ResourceNode};
use crate::path_set::{self, ROOT};
use crate::source::{self, SharedDirectory, SharedIndex};

/// Annotate every directory node with the status the index reports for its id.
///
/// Pure and order independent: the result follows `dir` and has exactly
/// `dir.len()` entries.
pub fn merge(dir: &[ResourceNode], indexed: &[IndexedNode]) -> Vec<MergedNode> {
    let status_by_id: HashMap<&str, IndexStatus> = indexed
        .iter()
        .map(|entry| (entry.node.id.as_str(), entry.status))
        .collect();

    dir.iter()
        .map(|node| MergedNode {
            node: node.clone(),
            status: status_by_id
                .get(node.id.as_str())
                .copied()
                .unwrap_or_default(),
        })
        .collect()
}

/// A folder to list: the root has no id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderRef {
    pub id: Option<String>,
    pub path: String,
}

impl FolderRef {
    pub fn root() -> Self {
        Self {
            id: None,
            path: ROOT.to_string(),
        }
    }

    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            path: path.into(),
        }
    }

    pub fn of(node: &ResourceNode) -> Self {
        Self::new(node.id.clone(), node.path.clone())
    }

    pub fn is_root(&self) -> bool {
        self.id.is_none()
    }
}

/// Every node seen so far, by path.
#[derive(Debug, Default)]
pub struct PathRegistry {
    nodes: RwLock<HashMap<String, ResourceNode>>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: &ResourceNode) {
        self.nodes.write().insert(node.path.clone(), node.clone());
    }

    pub fn get(&self, path: &str) -> Option<ResourceNode> {
        self.nodes.read().get(path).cloned()
    }

    pub fn id_of(&self, path: &str) -> Option<String> {
        self.nodes.read().get(path).map(|n| n.id.clone())
    }

    /// Folder reference for `path`, if it is the root or a known directory.
    pub fn folder(&self, path: &str) -> Option<FolderRef> {
        if path == ROOT {
            return Some(FolderRef::root());
        }
        self.get(path)
            .filter(|n| n.kind.is_dir())
            .map(|n| FolderRef::of(&n))
    }
}

pub type DirectoryCache = FetchCache<Vec<ResourceNode>>;
pub type IndexCache = FetchCache<Vec<IndexedNode>>;

/// Lazily fetches and merges one folder at a time.
pub struct TreeMerger {
    directory: SharedDirectory,
    index: SharedIndex,
    dir_cache: Arc<DirectoryCache>,
    index_cache: Arc<IndexCache>,
    registry: Arc<PathRegistry>,
}

impl TreeMerger {
    pub fn new(directory: SharedDirectory, index: SharedIndex) -> Self {
        Self::with_caches(
            directory,
            index,
            Arc::new(FetchCache::new()),
            Arc::new(FetchCache::new()),
            Arc::new(PathRegistry::new()),
        )
    }

    pub fn with_caches(
        directory: SharedDirectory,
        index: SharedIndex,
        dir_cache: Arc<DirectoryCache>,
        index_cache: Arc<IndexCache>,
        registry: Arc<PathRegistry>,
    ) -> Self {
        Self {
            directory,
            index,
            dir_cache,
            index_cache,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<PathRegistry> {
        &self.registry
    }

    pub fn index_source(&self) -> &SharedIndex {
        &self.index
    }

    /// Directory-source children of `folder`, cached per folder.
    pub async fn children(&self, folder: &FolderRef) -> Result<Arc<Vec<ResourceNode>>> {
        let key = CacheKey::directory(folder.id.as_deref(), &folder.path);
        let directory = Arc::clone(&self.directory);
        let folder_id = folder.id.clone();
        let nodes = self
            .dir_cache
            .get_or_fetch(key, || async move {
                debug!("listing directory {:?}", folder_id);
                let mut nodes = source::list_all_children(directory.as_ref(), folder_id.as_deref()).await?;
                for node in &mut nodes {
                    node.path = path_set::normalize(&node.path);
                }
                Ok(nodes)
            })
            .await?;
        for node in nodes.iter() {
            self.registry.record(node);
        }
        Ok(nodes)
    }

    /// Index-source children of `path`. A folder the index has never seen is empty.
    pub async fn indexed(&self, index_id: &str, path: &str) -> Result<Arc<Vec<IndexedNode>>> {
        let key = CacheKey::index(index_id, path);
        let index = Arc::clone(&self.index);
        let (index_id, path) = (index_id.to_string(), path.to_string());
        self.index_cache
            .get_or_fetch(key, || async move {
                match source::list_all_indexed(index.as_ref(), &index_id, &path).await {
                    Err(PickerError::NotFound(_)) => {
                        debug!("index {} has nothing under {}", index_id, path);
                        Ok(Vec::new())
                    }
                    other => other,
                }
            })
            .await
    }

    /// Fetch both listings of `folder` concurrently and merge them.
    pub async fn load_folder(
        &self,
        folder: &FolderRef,
        index_id: Option<&str>,
    ) -> Result<Vec<MergedNode>> {
        let children = self.children(folder);
        let indexed = async {
            match index_id {
                Some(id) => self.indexed(id, &folder.path).await.map(Some),
                None => Ok(None),
            }
        };
        let (children, indexed) = tokio::join!(children, indexed);
        let children = children?;
        let indexed = indexed?;
        Ok(merge(
            &children,
            indexed.as_deref().map(Vec::as_slice).unwrap_or_default(),
        ))
    }

    /// Warm the directory cache for every child folder in `nodes`.
    pub fn prefetch_children(&self, nodes: &[MergedNode]) {
        for child in nodes.iter().filter(|n| n.is_dir()) {
            let folder = FolderRef::of(&child.node);
            let key = CacheKey::directory(folder.id.as_deref(), &folder.path);
            let directory = Arc::clone(&self.directory);
            let registry = Arc::clone(&self.registry);
            self.dir_cache.prefetch(key, async move {
                let mut nodes = source::list_all_children(directory.as_ref(), folder.id.as_deref()).await?;
                for node in &mut nodes {
                    node.path = path_set::normalize(&node.path);
                    registry.record(node);
                }
                Ok(nodes)
            });
        }
    }

    pub fn invalidate_index_folder(&self, index_id: &str, path: &str) {
        self.index_cache.invalidate(&CacheKey::index(index_id, path));
    }

    pub fn invalidate_index(&self, index_id: &str) {
        let dropped = self.index_cache.invalidate_scope(SourceKind::Index, index_id);
        debug!("dropped {} cached listings of index {}", dropped, index_id);
    }
}
