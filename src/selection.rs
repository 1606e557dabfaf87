//! Cascading multi-select over a lazily loaded tree.
//!
//! The selection is kept in canonical minimal form: selecting a folder stands
//! for all of its descendants, so no member is ever an ancestor of another.
//! Selecting the last unselected sibling *consolidates* the siblings into their
//! parent; deselecting one child of a selected folder *explodes* the folder
//! into its remaining children.

use crate::error::PickerError;
use crate::model::NodeKind;
use crate::path_set::{self, PathSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    NotSelected,
    PartiallySelected,
    FullySelected,
}

/// One folder between a covering selection and the toggled path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub parent: String,
    /// Complete, current child list of `parent`.
    pub siblings: Vec<String>,
}

impl Level {
    pub fn new(parent: impl Into<String>, siblings: Vec<String>) -> Self {
        Self {
            parent: parent.into(),
            siblings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("edit mode is not active")]
    NotEditing,

    #[error("{path} is selected through {covering}; sibling lists down from {covering} are required")]
    LineageRequired { path: String, covering: String },

    #[error("sibling list of {parent} does not contain {path}")]
    SiblingsMismatch { parent: String, path: String },

    #[error("{member} is covered by {ancestor}")]
    NotCanonical { member: String, ancestor: String },
}

impl From<SelectionError> for PickerError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::NotEditing => PickerError::NotEditing,
            other => PickerError::InvariantViolation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionEngine {
    selected: PathSet,
    editing: bool,
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn selection(&self) -> &PathSet {
        &self.selected
    }

    pub fn selected_paths(&self) -> Vec<String> {
        self.selected.to_vec()
    }

    /// `true` if `path` or one of its ancestors is selected.
    pub fn is_selected(&self, path: &str) -> bool {
        self.selected.covers(path)
    }

    /// Tri-state view used for folder checkboxes.
    pub fn state_of(&self, path: &str) -> SelectionState {
        if self.selected.covers(path) {
            SelectionState::FullySelected
        } else if self.selected.descendants(path).next().is_some() {
            SelectionState::PartiallySelected
        } else {
            SelectionState::NotSelected
        }
    }

    pub fn enter_edit_mode<I, S>(&mut self, initial_paths: Option<I>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.editing = true;
        self.selected = match initial_paths {
            Some(paths) => paths
                .into_iter()
                .map(|p| path_set::normalize(p.as_ref()))
                .collect(),
            None => PathSet::new(),
        };
        self.selected.canonicalize();
    }

    pub fn exit_edit_mode(&mut self) {
        self.editing = false;
        self.selected.clear();
    }

    pub fn toggle_file(
        &mut self,
        path: &str,
        parent_path: &str,
        sibling_paths: &[String],
    ) -> Result<(), SelectionError> {
        let level = Level::new(parent_path, sibling_paths.to_vec());
        self.toggle_with_lineage(path, NodeKind::File, std::slice::from_ref(&level))
    }

    pub fn toggle_folder(
        &mut self,
        path: &str,
        parent_path: &str,
        sibling_paths: &[String],
    ) -> Result<(), SelectionError> {
        let level = Level::new(parent_path, sibling_paths.to_vec());
        self.toggle_with_lineage(path, NodeKind::Directory, std::slice::from_ref(&level))
    }

    /// Toggle `path` given the sibling lists of its enclosing folders.
    ///
    /// `levels` runs from the outermost folder down to the immediate parent of
    /// `path`. One level is enough unless `path` is selected through an
    /// ancestor above its parent, in which case every folder from that ancestor
    /// down must be supplied. Consolidation cascades upward as far as `levels`
    /// reaches.
    pub fn toggle_with_lineage(
        &mut self,
        path: &str,
        kind: NodeKind,
        levels: &[Level],
    ) -> Result<(), SelectionError> {
        if !self.editing {
            return Err(SelectionError::NotEditing);
        }
        check_lineage(path, levels)?;

        let mut next = self.selected.clone();
        match next.covering(path).map(str::to_owned) {
            Some(covering) if covering == path => {
                next.remove(path);
                next.remove_descendants(path);
            }
            Some(covering) => {
                let start = levels
                    .iter()
                    .position(|l| l.parent == covering)
                    .ok_or_else(|| SelectionError::LineageRequired {
                        path: path.to_string(),
                        covering: covering.clone(),
                    })?;
                explode(&mut next, &covering, path, &levels[start..]);
            }
            None => {
                if kind.is_dir() {
                    next.remove_descendants(path);
                }
                next.insert(path);
                consolidate(&mut next, levels);
            }
        }

        verify_canonical(&next)?;
        self.selected = next;
        Ok(())
    }

    /// Defensive check that the selection is still in canonical form.
    pub fn verify(&self) -> Result<(), SelectionError> {
        verify_canonical(&self.selected)
    }
}

fn chain_child<'a>(levels: &'a [Level], idx: usize, path: &'a str) -> &'a str {
    levels.get(idx + 1).map_or(path, |l| l.parent.as_str())
}

fn check_lineage(path: &str, levels: &[Level]) -> Result<(), SelectionError> {
    for (idx, level) in levels.iter().enumerate() {
        let child = chain_child(levels, idx, path);
        if !level.siblings.iter().any(|s| s == child) {
            return Err(SelectionError::SiblingsMismatch {
                parent: level.parent.clone(),
                path: child.to_string(),
            });
        }
    }
    Ok(())
}

/// Replace `covering` by every sibling on the way down except the chain
/// leading to `path`, leaving `path` itself unselected.
fn explode(set: &mut PathSet, covering: &str, path: &str, levels: &[Level]) {
    set.remove(covering);
    for (idx, level) in levels.iter().enumerate() {
        let keep_out = chain_child(levels, idx, path);
        for sibling in level.siblings.iter().filter(|s| s.as_str() != keep_out) {
            set.insert(sibling.clone());
        }
    }
}

/// Collapse fully selected sibling lists into their parent, innermost first.
fn consolidate(set: &mut PathSet, levels: &[Level]) {
    for level in levels.iter().rev() {
        if !level.siblings.iter().all(|s| set.contains(s)) {
            break;
        }
        for sibling in &level.siblings {
            set.remove(sibling);
        }
        set.remove_descendants(&level.parent);
        set.insert(level.parent.clone());
    }
}

fn verify_canonical(set: &PathSet) -> Result<(), SelectionError> {
    for member in set.iter() {
        if let Some(ancestor) = path_set::ancestors(member).find(|a| set.contains(a)) {
            return Err(SelectionError::NotCanonical {
                member: member.to_string(),
                ancestor: ancestor.to_string(),
            });
        }
    }
    Ok(())
}
