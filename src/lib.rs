//! Reconciliation core for a file picker that mirrors a selection into an
//! asynchronously processed index.
//!
//! A [`PickerSession`] browses a [`DirectorySource`] lazily, keeps a cascading
//! selection in canonical form, submits rebuilds to an [`IndexSource`] and
//! shows optimistic status until the new index confirms it.

pub mod cache;
pub mod config;
pub mod error;
pub mod expand;
pub mod local;
pub mod memory;
pub mod merge;
pub mod model;
pub mod overlay;
pub mod path_set;
pub mod poll;
pub mod reconcile;
pub mod selection;
pub mod session;
pub mod source;
pub mod tree;

pub use cache::{CacheKey, FetchCache, SourceKind};
pub use config::Config;
pub use error::{PickerError, Result};
pub use expand::{FileRef, PathExpander};
pub use local::LocalDirectory;
pub use memory::{MemoryDirectory, MemoryIndex, NodeResolver, Processing};
pub use merge::{FolderRef, TreeMerger, merge};
pub use model::{IndexStatus, IndexedNode, MergedNode, NodeKind, Page, ResourceNode};
pub use overlay::PendingOverlay;
pub use path_set::PathSet;
pub use poll::{FolderUpdate, PollerSet};
pub use reconcile::{Generation, Phase, Reconciler};
pub use selection::{Level, SelectionEngine, SelectionError, SelectionState};
pub use session::{NodeView, PickerSession, ViewEntry};
pub use source::{DirectorySource, IndexSource};
pub use tree::TreeEntry;
