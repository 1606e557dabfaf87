//! Visible rows of a lazily expanded tree, built without recursion.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;

use crate::error::{PickerError, Result};
use crate::merge::{FolderRef, TreeMerger};
use crate::model::MergedNode;

#[derive(Debug, Clone, PartialEq)]
pub enum TreeEntry {
    Node { depth: usize, node: MergedNode },
    /// The listing of `folder` failed; its siblings are unaffected.
    Failed {
        depth: usize,
        folder: String,
        error: PickerError,
    },
}

enum Frame {
    Folder { path: String, depth: usize },
    Row { node: MergedNode, depth: usize },
}

/// Load the root and every expanded folder reachable from it.
///
/// Folders at one depth are fetched concurrently; depths are fetched in
/// sequence. Rows come back in display order: each expanded folder's
/// children directly follow it.
pub async fn walk_expanded(
    merger: &TreeMerger,
    index_id: Option<&str>,
    expanded: &HashSet<String>,
) -> Vec<TreeEntry> {
    let mut listings: HashMap<String, Result<Vec<MergedNode>>> = HashMap::new();
    let mut level = vec![FolderRef::root()];

    while !level.is_empty() {
        let results = join_all(level.iter().map(|f| merger.load_folder(f, index_id))).await;
        let mut next = Vec::new();
        for (folder, result) in level.into_iter().zip(results) {
            if let Ok(nodes) = &result {
                merger.prefetch_children(nodes);
                next.extend(
                    nodes
                        .iter()
                        .filter(|n| n.is_dir() && expanded.contains(n.path()))
                        .map(|n| FolderRef::of(&n.node)),
                );
            }
            listings.insert(folder.path, result);
        }
        level = next;
    }

    let mut entries = Vec::new();
    let mut stack = vec![Frame::Folder {
        path: crate::path_set::ROOT.to_string(),
        depth: 0,
    }];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Row { node, depth } => entries.push(TreeEntry::Node { depth, node }),
            Frame::Folder { path, depth } => match listings.remove(&path) {
                Some(Ok(nodes)) => {
                    for node in nodes.into_iter().rev() {
                        if node.is_dir() && expanded.contains(node.path()) {
                            stack.push(Frame::Folder {
                                path: node.path().to_string(),
                                depth: depth + 1,
                            });
                        }
                        stack.push(Frame::Row { node, depth });
                    }
                }
                Some(Err(error)) => entries.push(TreeEntry::Failed {
                    depth,
                    folder: path,
                    error,
                }),
                None => {}
            },
        }
    }
    entries
}
