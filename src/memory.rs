//! Deterministic in-memory collaborators.
//!
//! `MemoryDirectory` serves a fixed tree; `MemoryIndex` keeps one entry map per
//! index id and can simulate the server stepping files through processing.
//! Both support failure injection.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{PickerError, Result};
use crate::model::{IndexStatus, IndexedNode, Page, ResourceNode};
use crate::path_set::{self, ROOT};
use crate::source::{DirectorySource, IndexSource};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Look up directory nodes without listing, used by the index to describe
/// the files it was asked to ingest.
pub trait NodeResolver: Send + Sync {
    fn by_id(&self, id: &str) -> Option<ResourceNode>;
    fn by_path(&self, path: &str) -> Option<ResourceNode>;
}

pub type SharedResolver = Arc<dyn NodeResolver>;

pub struct MemoryDirectory {
    by_id: HashMap<String, ResourceNode>,
    by_path: HashMap<String, String>,
    children: HashMap<String, Vec<ResourceNode>>,
    page_size: usize,
    list_calls: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl MemoryDirectory {
    /// Build a tree from file paths; every ancestor becomes a directory.
    /// Ids are assigned in path order as `res-1`, `res-2`, ...
    pub fn from_paths<S: AsRef<str>>(files: &[S]) -> Self {
        let mut kinds: BTreeMap<String, bool> = BTreeMap::new();
        for file in files {
            let path = path_set::normalize(file.as_ref());
            if path == ROOT {
                continue;
            }
            for ancestor in path_set::ancestors(&path).filter(|a| *a != ROOT) {
                kinds.insert(ancestor.to_string(), true);
            }
            kinds.entry(path).or_insert(false);
        }

        let mut by_id = HashMap::new();
        let mut by_path = HashMap::new();
        let mut children: HashMap<String, Vec<ResourceNode>> = HashMap::new();
        for (n, (path, is_dir)) in kinds.into_iter().enumerate() {
            let id = format!("res-{}", n + 1);
            let node = if is_dir {
                ResourceNode::dir(id.clone(), path.clone())
            } else {
                ResourceNode::file(id.clone(), path.clone())
            };
            let parent = path_set::parent(&path).unwrap_or(ROOT).to_string();
            children.entry(parent).or_default().push(node.clone());
            by_path.insert(path, id.clone());
            by_id.insert(id, node);
        }

        Self {
            by_id,
            by_path,
            children,
            page_size: DEFAULT_PAGE_SIZE,
            list_calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn resolver(self: &Arc<Self>) -> SharedResolver {
        Arc::clone(self) as SharedResolver
    }

    pub fn id_of(&self, path: &str) -> Option<String> {
        self.by_path.get(&path_set::normalize(path)).cloned()
    }

    /// Number of `list_children` page requests served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make every listing of the folder at `path` fail until `heal_folder`.
    pub fn fail_folder(&self, path: &str) {
        self.failing.lock().insert(path_set::normalize(path));
    }

    pub fn heal_folder(&self, path: &str) {
        self.failing.lock().remove(&path_set::normalize(path));
    }
}

impl NodeResolver for MemoryDirectory {
    fn by_id(&self, id: &str) -> Option<ResourceNode> {
        self.by_id.get(id).cloned()
    }

    fn by_path(&self, path: &str) -> Option<ResourceNode> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id)).cloned()
    }
}

#[async_trait]
impl DirectorySource for MemoryDirectory {
    async fn list_children(
        &self,
        folder_id: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Page<ResourceNode>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let path = match folder_id {
            None => ROOT.to_string(),
            Some(id) => match self.by_id.get(id) {
                Some(node) if node.kind.is_dir() => node.path.clone(),
                _ => return Err(PickerError::not_found(id)),
            },
        };
        if self.failing.lock().contains(&path) {
            return Err(PickerError::server(format!("listing {path} failed")));
        }
        let children = self.children.get(&path).map(Vec::as_slice).unwrap_or_default();
        Page::at_offset(children, cursor, self.page_size)
    }
}

/// How a freshly rebuilt index reports its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Processing {
    /// Files are `Indexed` as soon as the rebuild returns.
    #[default]
    Instant,
    /// Files start in the setup `Error` state and advance one step
    /// (`Pending`, `BeingIndexed`, `Indexed`) each time their folder is listed.
    Stepped,
}

fn advance(status: IndexStatus) -> IndexStatus {
    match status {
        IndexStatus::Error => IndexStatus::Pending,
        IndexStatus::Pending => IndexStatus::BeingIndexed,
        IndexStatus::BeingIndexed => IndexStatus::Indexed,
        other => other,
    }
}

type Entries = BTreeMap<String, IndexedNode>;

pub struct MemoryIndex {
    resolver: SharedResolver,
    indexes: Mutex<HashMap<String, Entries>>,
    next_id: AtomicU64,
    processing: Processing,
    page_size: usize,
    fail_rebuild: AtomicBool,
    fail_delete: AtomicBool,
    rebuild_calls: AtomicUsize,
}

impl MemoryIndex {
    pub fn new(resolver: SharedResolver) -> Self {
        Self {
            resolver,
            indexes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            processing: Processing::default(),
            page_size: DEFAULT_PAGE_SIZE,
            fail_rebuild: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            rebuild_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_processing(mut self, processing: Processing) -> Self {
        self.processing = processing;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn allocate_id(&self) -> String {
        format!("kb-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Entries for `file_ids` and their ancestor folders.
    fn build_entries(&self, file_ids: &[String], status: IndexStatus) -> Result<Entries> {
        let mut entries = Entries::new();
        for id in file_ids {
            let node = self
                .resolver
                .by_id(id)
                .ok_or_else(|| PickerError::not_found(id.clone()))?;
            for ancestor in path_set::ancestors(&node.path).filter(|a| *a != ROOT) {
                if entries.contains_key(ancestor) {
                    break;
                }
                if let Some(dir) = self.resolver.by_path(ancestor) {
                    entries.insert(
                        ancestor.to_string(),
                        IndexedNode::new(dir, IndexStatus::Indexed),
                    );
                }
            }
            entries.insert(node.path.clone(), IndexedNode::new(node, status));
        }
        Ok(entries)
    }

    /// Create a fully indexed index holding `file_ids`.
    pub fn create_index<S: AsRef<str>>(&self, file_ids: &[S]) -> Result<String> {
        let ids: Vec<String> = file_ids.iter().map(|s| s.as_ref().to_string()).collect();
        let entries = self.build_entries(&ids, IndexStatus::Indexed)?;
        let id = self.allocate_id();
        self.indexes.lock().insert(id.clone(), entries);
        Ok(id)
    }

    /// Fail the next `submit_rebuild` after its old index has been dropped.
    pub fn fail_next_rebuild(&self) {
        self.fail_rebuild.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn rebuild_calls(&self) -> usize {
        self.rebuild_calls.load(Ordering::SeqCst)
    }

    pub fn contains_index(&self, index_id: &str) -> bool {
        self.indexes.lock().contains_key(index_id)
    }

    pub fn status_of(&self, index_id: &str, path: &str) -> Option<IndexStatus> {
        self.indexes
            .lock()
            .get(index_id)
            .and_then(|entries| entries.get(path))
            .map(|entry| entry.status)
    }

    pub fn set_status(&self, index_id: &str, path: &str, status: IndexStatus) -> Result<()> {
        let mut indexes = self.indexes.lock();
        let entry = indexes
            .get_mut(index_id)
            .and_then(|entries| entries.get_mut(path))
            .ok_or_else(|| PickerError::not_found(path))?;
        entry.status = status;
        Ok(())
    }

    /// Every file path in `index_id`, in path order.
    pub fn file_paths(&self, index_id: &str) -> Vec<String> {
        self.indexes
            .lock()
            .get(index_id)
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| !e.node.kind.is_dir())
                    .map(|e| e.node.path.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl IndexSource for MemoryIndex {
    async fn list_indexed(
        &self,
        index_id: &str,
        path: &str,
        cursor: Option<&str>,
    ) -> Result<Page<IndexedNode>> {
        let mut indexes = self.indexes.lock();
        let entries = indexes
            .get_mut(index_id)
            .ok_or_else(|| PickerError::not_found(index_id))?;

        let children: Vec<IndexedNode> = entries
            .values()
            .filter(|e| path_set::parent(&e.node.path) == Some(path))
            .cloned()
            .collect();

        if self.processing == Processing::Stepped && cursor.is_none() {
            for child in &children {
                if let Some(entry) = entries.get_mut(&child.node.path) {
                    entry.status = advance(entry.status);
                }
            }
        }
        Page::at_offset(&children, cursor, self.page_size)
    }

    async fn submit_rebuild(&self, index_id: &str, file_ids: &[String]) -> Result<String> {
        self.rebuild_calls.fetch_add(1, Ordering::SeqCst);
        let removed = self.indexes.lock().remove(index_id).is_some();
        debug!("dropped index {} (existed: {})", index_id, removed);

        if self.fail_rebuild.swap(false, Ordering::SeqCst) {
            return Err(PickerError::server("index creation failed"));
        }

        let initial = match self.processing {
            Processing::Instant => IndexStatus::Indexed,
            Processing::Stepped => IndexStatus::Error,
        };
        let unique: Vec<String> = file_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let entries = self.build_entries(&unique, initial)?;
        let id = self.allocate_id();
        self.indexes.lock().insert(id.clone(), entries);
        debug!("created index {} with {} files", id, unique.len());
        Ok(id)
    }

    async fn delete_resource(&self, index_id: &str, path: &str) -> Result<()> {
        if self.fail_delete.swap(false, Ordering::SeqCst) {
            return Err(PickerError::server(format!("delete of {path} failed")));
        }
        let mut indexes = self.indexes.lock();
        let entries = indexes
            .get_mut(index_id)
            .ok_or_else(|| PickerError::not_found(index_id))?;
        if entries.remove(path).is_none() {
            return Err(PickerError::not_found(path));
        }
        entries.retain(|p, _| !path_set::is_ancestor(path, p));
        Ok(())
    }
}
