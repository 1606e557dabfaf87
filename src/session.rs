//! One picker bound to a directory source and the current index.
//!
//! The session owns the selection, the reconciler and the optimistic delete
//! markers, and decorates every folder it loads with the status to display.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PickerError, Result};
use crate::expand::PathExpander;
use crate::merge::{FolderRef, TreeMerger};
use crate::model::{IndexStatus, MergedNode, NodeKind};
use crate::path_set::{self, PathSet, ROOT};
use crate::reconcile::{Phase, Reconciler};
use crate::selection::{Level, SelectionEngine, SelectionState};
use crate::source::{SharedDirectory, SharedIndex};
use crate::tree::{self, TreeEntry};

/// A merged node as it should be displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub node: MergedNode,
    /// Status after the pending overlay and local deletions are applied.
    pub effective: IndexStatus,
    /// Checkbox state, only while editing.
    pub selection: Option<SelectionState>,
}

impl NodeView {
    pub fn path(&self) -> &str {
        self.node.path()
    }

    pub fn is_dir(&self) -> bool {
        self.node.is_dir()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEntry {
    Row { depth: usize, view: NodeView },
    Failed {
        depth: usize,
        folder: String,
        error: PickerError,
    },
}

pub struct PickerSession {
    merger: Arc<TreeMerger>,
    expander: PathExpander,
    config: Config,
    index_id: RwLock<String>,
    selection: Mutex<SelectionEngine>,
    reconciler: Mutex<Reconciler>,
    /// Paths deleted locally whose removal the index has not yet reflected.
    removed: Mutex<PathSet>,
}

impl PickerSession {
    pub fn new(
        directory: SharedDirectory,
        index: SharedIndex,
        index_id: impl Into<String>,
        config: Config,
    ) -> Self {
        let merger = Arc::new(TreeMerger::new(directory, index));
        Self {
            expander: PathExpander::new(Arc::clone(&merger)),
            merger,
            reconciler: Mutex::new(Reconciler::new(
                config.suppression_window(),
                config.grace_period(),
            )),
            config,
            index_id: RwLock::new(index_id.into()),
            selection: Mutex::new(SelectionEngine::new()),
            removed: Mutex::new(PathSet::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn merger(&self) -> &Arc<TreeMerger> {
        &self.merger
    }

    pub fn expander(&self) -> &PathExpander {
        &self.expander
    }

    pub fn index_id(&self) -> String {
        self.index_id.read().clone()
    }

    // Edit mode

    pub fn is_editing(&self) -> bool {
        self.selection.lock().is_editing()
    }

    pub fn enter_edit_mode(&self, initial_paths: Option<Vec<String>>) {
        self.selection.lock().enter_edit_mode(initial_paths);
    }

    /// Enter edit mode pre-selected with every file the index holds.
    pub async fn enter_edit_mode_from_index(&self) -> Result<usize> {
        let index_id = self.index_id();
        let files = self.expander.indexed_files(&index_id).await?;
        let mut selection = self.selection.lock();
        selection.enter_edit_mode(Some(files));
        Ok(selection.selection().len())
    }

    pub fn cancel_edit(&self) {
        self.selection.lock().exit_edit_mode();
    }

    pub fn selected_paths(&self) -> Vec<String> {
        self.selection.lock().selected_paths()
    }

    pub fn selection_state(&self, path: &str) -> SelectionState {
        self.selection.lock().state_of(&path_set::normalize(path))
    }

    async fn folder_ref(&self, path: &str) -> Result<FolderRef> {
        if let Some(folder) = self.merger.registry().folder(path) {
            return Ok(folder);
        }
        let node = self.expander.resolve(path).await?;
        if !node.kind.is_dir() {
            return Err(PickerError::not_found(path));
        }
        Ok(FolderRef::of(&node))
    }

    /// Sibling lists of every folder from the root down to the parent of `path`.
    async fn lineage(&self, path: &str) -> Result<Vec<Level>> {
        let mut folders: Vec<&str> = path_set::ancestors(path).collect();
        folders.reverse();
        let refs = try_join_all(folders.iter().map(|f| self.folder_ref(f))).await?;
        let listings = try_join_all(refs.iter().map(|f| self.merger.children(f))).await?;
        Ok(refs
            .into_iter()
            .zip(listings)
            .map(|(folder, children)| {
                Level::new(folder.path, children.iter().map(|n| n.path.clone()).collect())
            })
            .collect())
    }

    /// Toggle the checkbox of `path`, cascading to its relatives.
    pub async fn toggle(&self, path: &str) -> Result<()> {
        if !self.is_editing() {
            return Err(PickerError::NotEditing);
        }
        let path = path_set::normalize(path);
        let kind = if path == ROOT {
            NodeKind::Directory
        } else {
            match self.merger.registry().get(&path) {
                Some(node) => node.kind,
                None => self.expander.resolve(&path).await?.kind,
            }
        };
        let levels = self.lineage(&path).await?;
        self.selection
            .lock()
            .toggle_with_lineage(&path, kind, &levels)?;
        debug!("toggled {}", path);
        Ok(())
    }

    // Rebuild

    /// Replace the index contents with the current selection and leave edit
    /// mode. The selected paths show as pending before any request is sent.
    /// On failure the overlay is dropped and edit mode is kept for a retry.
    pub async fn save(&self) -> Result<String> {
        let selected = {
            let selection = self.selection.lock();
            if !selection.is_editing() {
                return Err(PickerError::NotEditing);
            }
            selection.verify()?;
            selection.selected_paths()
        };
        let generation = {
            let mut reconciler = self.reconciler.lock();
            let now = Instant::now();
            reconciler.tick(now);
            if reconciler.is_submitting() {
                return Err(PickerError::RebuildInFlight);
            }
            reconciler.arm(selected.iter().cloned(), now)
        };

        let old_id = self.index_id();
        let submitted = async {
            let file_ids = self.expander.expand_ids(&selected).await?;
            info!(
                "submitting rebuild of {} with {} files from {} paths",
                old_id,
                file_ids.len(),
                selected.len()
            );
            self.merger
                .index_source()
                .submit_rebuild(&old_id, &file_ids)
                .await
        }
        .await;

        let new_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                self.reconciler.lock().abort(generation);
                // The server may have dropped the old index before failing.
                self.merger.invalidate_index(&old_id);
                warn!("rebuild of {} failed: {}", old_id, e);
                return Err(e);
            }
        };

        self.reconciler
            .lock()
            .bind_index(generation, &new_id, Instant::now());
        *self.index_id.write() = new_id.clone();
        self.merger.invalidate_index(&old_id);
        self.merger.invalidate_index(&new_id);
        self.removed.lock().clear();
        self.selection.lock().exit_edit_mode();
        info!("rebuild accepted, now tracking index {}", new_id);
        Ok(new_id)
    }

    pub fn phase(&self) -> Phase {
        self.reconciler.lock().tick(Instant::now())
    }

    pub fn is_rebuilding(&self) -> bool {
        self.reconciler.lock().is_rebuilding(Instant::now())
    }

    pub fn pending_paths(&self) -> Vec<String> {
        let mut reconciler = self.reconciler.lock();
        reconciler.tick(Instant::now());
        reconciler.overlay().pending().to_vec()
    }

    // Delete

    /// Remove `path` from the index, showing it as not indexed right away.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let path = path_set::normalize(path);
        let marked = self.removed.lock().insert(path.clone());
        let index_id = self.index_id();

        let result = self
            .merger
            .index_source()
            .delete_resource(&index_id, &path)
            .await;
        self.merger.invalidate_index(&index_id);

        match result {
            Ok(()) => {
                info!("deleted {} from {}", path, index_id);
                Ok(())
            }
            Err(e) => {
                if marked {
                    self.removed.lock().remove(&path);
                }
                warn!("delete of {} failed, rolled back: {}", path, e);
                Err(e)
            }
        }
    }

    // Display

    /// Merged, decorated children of the folder at `path`.
    pub async fn load_folder(&self, path: &str) -> Result<Vec<NodeView>> {
        let path = path_set::normalize(path);
        let folder = self.folder_ref(&path).await?;
        let index_id = self.index_id();
        let nodes = self.merger.load_folder(&folder, Some(&index_id)).await?;
        self.merger.prefetch_children(&nodes);
        Ok(self.decorate(&index_id, nodes))
    }

    /// Drop the cached index listing of `path` and load it again.
    pub async fn refresh_folder(&self, path: &str) -> Result<Vec<NodeView>> {
        let path = path_set::normalize(path);
        self.merger.invalidate_index_folder(&self.index_id(), &path);
        self.load_folder(&path).await
    }

    /// The root plus every expanded folder, in display order.
    pub async fn visible_tree(&self, expanded: &HashSet<String>) -> Vec<ViewEntry> {
        let index_id = self.index_id();
        let entries = tree::walk_expanded(&self.merger, Some(&index_id), expanded).await;

        let mut nodes = Vec::new();
        let mut shape = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                TreeEntry::Node { depth, node } => {
                    nodes.push(node);
                    shape.push(Ok(depth));
                }
                TreeEntry::Failed {
                    depth,
                    folder,
                    error,
                } => shape.push(Err((depth, folder, error))),
            }
        }

        let mut views = self.decorate(&index_id, nodes).into_iter();
        shape
            .into_iter()
            .filter_map(|slot| match slot {
                Ok(depth) => views.next().map(|view| ViewEntry::Row { depth, view }),
                Err((depth, folder, error)) => Some(ViewEntry::Failed {
                    depth,
                    folder,
                    error,
                }),
            })
            .collect()
    }

    fn decorate(&self, index_id: &str, nodes: Vec<MergedNode>) -> Vec<NodeView> {
        let now = Instant::now();
        let mut reconciler = self.reconciler.lock();
        let released = reconciler.observe(index_id, &nodes, now);
        if !released.is_empty() {
            debug!("released {:?} from the pending overlay", released);
        }

        let mut removed = self.removed.lock();
        for node in &nodes {
            if node.status == IndexStatus::NotIndexed && removed.remove(node.path()) {
                debug!("index no longer lists {}, dropping delete marker", node.path());
            }
        }

        let selection = self.selection.lock();
        nodes
            .into_iter()
            .map(|node| {
                let mut effective =
                    reconciler.effective_status(index_id, node.path(), node.status, now);
                if !reconciler.overlay().is_active() && removed.covers(node.path()) {
                    effective = IndexStatus::NotIndexed;
                }
                let state = selection
                    .is_editing()
                    .then(|| selection.state_of(node.path()));
                NodeView {
                    node,
                    effective,
                    selection: state,
                }
            })
            .collect()
    }

    /// Whether a folder showing `views` should keep being re-listed: some
    /// file is still in flight, or still in setup during a rebuild.
    pub fn should_poll(&self, views: &[NodeView]) -> bool {
        let rebuilding = self.is_rebuilding();
        views.iter().filter(|v| !v.is_dir()).any(|v| {
            v.effective.is_in_flight() || (rebuilding && v.node.status == IndexStatus::Error)
        })
    }
}

impl std::fmt::Debug for PickerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickerSession")
            .field("index_id", &self.index_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDirectory, MemoryIndex, Processing};
    use std::time::Duration;

    struct Fixture {
        dir: Arc<MemoryDirectory>,
        index: Arc<MemoryIndex>,
        session: PickerSession,
    }

    fn fixture(processing: Processing) -> Fixture {
        let dir = Arc::new(MemoryDirectory::from_paths(&[
            "/a/b/c.txt",
            "/a/b/d.txt",
            "/a/e.txt",
            "/x/f1.txt",
            "/y/old.txt",
            "/z.txt",
        ]));
        let index = Arc::new(MemoryIndex::new(dir.resolver()).with_processing(processing));
        let kb = index
            .create_index(&[dir.id_of("/y/old.txt").unwrap()])
            .unwrap();
        let session = PickerSession::new(dir.clone(), index.clone(), kb, Config::default());
        Fixture {
            dir,
            index,
            session,
        }
    }

    fn status_of(views: &[NodeView], path: &str) -> IndexStatus {
        views
            .iter()
            .find(|v| v.path() == path)
            .map(|v| v.effective)
            .unwrap_or_else(|| panic!("{path} not listed"))
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_shows_pending_then_reverts_to_server_status() {
        let f = fixture(Processing::Instant);
        f.session.enter_edit_mode(None);
        f.session.toggle("/x").await.unwrap();
        assert_eq!(f.session.selected_paths(), vec!["/x"]);

        f.session.save().await.unwrap();
        assert!(!f.session.is_editing());
        assert_eq!(f.session.pending_paths(), vec!["/x"]);

        let x = f.session.load_folder("/x").await.unwrap();
        assert_eq!(status_of(&x, "/x/f1.txt"), IndexStatus::Pending);
        let y = f.session.load_folder("/y").await.unwrap();
        assert_eq!(status_of(&y, "/y/old.txt"), IndexStatus::NotIndexed);

        tokio::time::advance(Duration::from_secs(4)).await;
        let x = f.session.refresh_folder("/x").await.unwrap();
        assert!(f.session.pending_paths().is_empty());
        assert_eq!(status_of(&x, "/x/f1.txt"), IndexStatus::Indexed);
        assert!(!f.session.should_poll(&x));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rebuild_disarms_and_keeps_edit_mode() {
        let f = fixture(Processing::Instant);
        let old = f.session.index_id();
        f.session.enter_edit_mode(Some(vec!["/x".to_string()]));
        f.index.fail_next_rebuild();

        let err = f.session.save().await.unwrap_err();
        assert!(matches!(err, PickerError::TransientServer(_)));
        assert!(f.session.pending_paths().is_empty());
        assert!(!f.session.is_rebuilding());
        assert!(f.session.is_editing());
        assert_eq!(f.session.index_id(), old);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rebuild_resyncs_with_the_dropped_index() {
        let f = fixture(Processing::Instant);
        let y = f.session.load_folder("/y").await.unwrap();
        assert_eq!(status_of(&y, "/y/old.txt"), IndexStatus::Indexed);

        f.session.enter_edit_mode(Some(vec!["/x".to_string()]));
        f.index.fail_next_rebuild();
        assert!(f.session.save().await.is_err());
        assert!(!f.index.contains_index(&f.session.index_id()));

        let y = f.session.load_folder("/y").await.unwrap();
        assert_eq!(status_of(&y, "/y/old.txt"), IndexStatus::NotIndexed);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_paths_expire_after_grace_period() {
        let f = fixture(Processing::Stepped);
        f.session.enter_edit_mode(Some(vec!["/x".to_string()]));
        f.session.save().await.unwrap();
        assert_eq!(f.session.pending_paths(), vec!["/x"]);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(f.session.pending_paths().is_empty());
        assert!(!f.session.is_rebuilding());
    }

    #[tokio::test]
    async fn unresolvable_selection_submits_nothing() {
        let f = fixture(Processing::Instant);
        f.session
            .enter_edit_mode(Some(vec!["/x".to_string(), "/gone".to_string()]));
        assert_eq!(
            f.session.save().await,
            Err(PickerError::NotFound("/gone".into()))
        );
        assert_eq!(f.index.rebuild_calls(), 0);
        assert!(f.session.pending_paths().is_empty());
    }

    #[tokio::test]
    async fn save_requires_edit_mode() {
        let f = fixture(Processing::Instant);
        assert_eq!(f.session.save().await, Err(PickerError::NotEditing));
        assert_eq!(f.session.toggle("/x").await, Err(PickerError::NotEditing));
    }

    #[tokio::test]
    async fn toggling_inside_a_selected_ancestor_explodes_it() {
        let f = fixture(Processing::Instant);
        f.session.enter_edit_mode(Some(vec!["/a".to_string()]));

        f.session.toggle("/a/b/c.txt").await.unwrap();
        assert_eq!(f.session.selected_paths(), vec!["/a/b/d.txt", "/a/e.txt"]);
        assert_eq!(
            f.session.selection_state("/a/b"),
            SelectionState::PartiallySelected
        );

        f.session.toggle("/a/b/c.txt").await.unwrap();
        assert_eq!(f.session.selected_paths(), vec!["/a"]);
    }

    #[tokio::test]
    async fn folder_views_carry_checkbox_state_while_editing() {
        let f = fixture(Processing::Instant);
        let root = f.session.load_folder("/").await.unwrap();
        assert!(root.iter().all(|v| v.selection.is_none()));
        assert_eq!(status_of(&root, "/y"), IndexStatus::Indexed);

        f.session.enter_edit_mode(Some(vec!["/a/e.txt".to_string()]));
        let root = f.session.load_folder("/").await.unwrap();
        let a = root.iter().find(|v| v.path() == "/a").unwrap();
        assert_eq!(a.selection, Some(SelectionState::PartiallySelected));
    }

    #[tokio::test]
    async fn seeds_edit_mode_from_the_index() {
        let f = fixture(Processing::Instant);
        assert_eq!(f.session.enter_edit_mode_from_index().await.unwrap(), 1);
        assert_eq!(f.session.selected_paths(), vec!["/y/old.txt"]);
    }

    #[tokio::test]
    async fn delete_is_optimistic_and_rolls_back_on_failure() {
        let f = fixture(Processing::Instant);
        let y = f.session.load_folder("/y").await.unwrap();
        assert_eq!(status_of(&y, "/y/old.txt"), IndexStatus::Indexed);

        f.index.fail_next_delete();
        assert!(f.session.delete("/y/old.txt").await.is_err());
        let y = f.session.load_folder("/y").await.unwrap();
        assert_eq!(status_of(&y, "/y/old.txt"), IndexStatus::Indexed);

        f.session.delete("/y/old.txt").await.unwrap();
        let y = f.session.load_folder("/y").await.unwrap();
        assert_eq!(status_of(&y, "/y/old.txt"), IndexStatus::NotIndexed);
        assert!(f.session.removed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_through_setup_errors_until_indexed() {
        let f = fixture(Processing::Stepped);
        f.session.enter_edit_mode(Some(vec!["/x/f1.txt".to_string()]));
        f.session.save().await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        let mut raw = Vec::new();
        loop {
            let views = f.session.refresh_folder("/x").await.unwrap();
            raw.push(views[0].node.status);
            if !f.session.should_poll(&views) {
                break;
            }
        }
        assert_eq!(
            raw,
            vec![
                IndexStatus::Error,
                IndexStatus::Pending,
                IndexStatus::BeingIndexed,
                IndexStatus::Indexed,
            ]
        );
        assert!(f.session.pending_paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn setup_error_on_a_sibling_keeps_the_folder_polling() {
        let dir = Arc::new(MemoryDirectory::from_paths(&["/x/a.txt", "/x/b.txt"]));
        let index = Arc::new(MemoryIndex::new(dir.resolver()).with_processing(Processing::Stepped));
        let kb = index.create_index::<&str>(&[]).unwrap();
        let session = PickerSession::new(dir, index.clone(), kb, Config::default());
        session.enter_edit_mode(Some(vec!["/x".to_string()]));
        let new_id = session.save().await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        // b stays in setup while a walks through to indexed.
        for _ in 0..4 {
            let views = session.refresh_folder("/x").await.unwrap();
            index
                .set_status(&new_id, "/x/b.txt", IndexStatus::Error)
                .unwrap();
            assert_eq!(status_of(&views, "/x/b.txt"), IndexStatus::Pending);
            assert!(session.should_poll(&views));
        }
        assert!(session.pending_paths().is_empty());
        assert!(session.is_rebuilding());

        let mut rounds = 0;
        loop {
            let views = session.refresh_folder("/x").await.unwrap();
            if !session.should_poll(&views) {
                assert_eq!(status_of(&views, "/x/a.txt"), IndexStatus::Indexed);
                assert_eq!(status_of(&views, "/x/b.txt"), IndexStatus::Indexed);
                break;
            }
            rounds += 1;
            assert!(rounds < 10, "folder never settled");
        }
    }

    #[tokio::test]
    async fn visible_tree_decorates_rows_and_keeps_failures() {
        let f = fixture(Processing::Instant);
        f.dir.fail_folder("/a");
        let expanded: HashSet<String> = ["/a", "/y"].iter().map(|s| s.to_string()).collect();
        let rows = f.session.visible_tree(&expanded).await;
        let rendered: Vec<String> = rows
            .iter()
            .map(|r| match r {
                ViewEntry::Row { depth, view } => {
                    format!("{}{} {}", "  ".repeat(*depth), view.path(), view.effective)
                }
                ViewEntry::Failed { depth, folder, .. } => format!("{}!{}", "  ".repeat(*depth), folder),
            })
            .collect();
        assert_eq!(
            rendered,
            vec![
                "/a not_indexed",
                "  !/a",
                "/x not_indexed",
                "/y indexed",
                "  /y/old.txt indexed",
                "/z.txt not_indexed",
            ]
        );

        f.dir.heal_folder("/a");
        let rows = f.session.visible_tree(&expanded).await;
        assert!(rows.iter().all(|r| matches!(r, ViewEntry::Row { .. })));
        assert!(rows.iter().any(|r| matches!(
            r,
            ViewEntry::Row { view, .. } if view.path() == "/a/e.txt"
        )));
    }
}
