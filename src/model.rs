use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PickerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    #[serde(alias = "folder")]
    Directory,
}

impl NodeKind {
    pub fn is_dir(self) -> bool {
        matches!(self, NodeKind::Directory)
    }
}

/// One item of either source. `id` is shared by both sources for the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub path: String,
    pub kind: NodeKind,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, path: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            kind,
        }
    }

    pub fn file(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(id, path, NodeKind::File)
    }

    pub fn dir(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(id, path, NodeKind::Directory)
    }

    pub fn name(&self) -> &str {
        crate::path_set::file_name(&self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IndexStatus {
    #[default]
    NotIndexed,
    Pending,
    BeingIndexed,
    Indexed,
    /// Reported by the server while a rebuild is being set up.
    Error,
    Deleted,
}

impl IndexStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexStatus::NotIndexed => "not_indexed",
            IndexStatus::Pending => "pending",
            IndexStatus::BeingIndexed => "being_indexed",
            IndexStatus::Indexed => "indexed",
            IndexStatus::Error => "error",
            IndexStatus::Deleted => "deleted",
        }
    }

    /// Work is queued or running server-side.
    pub fn is_in_flight(self) -> bool {
        matches!(self, IndexStatus::Pending | IndexStatus::BeingIndexed)
    }

    /// The new index generation has actually picked the file up.
    pub fn confirms_rebuild(self) -> bool {
        matches!(
            self,
            IndexStatus::Pending | IndexStatus::BeingIndexed | IndexStatus::Indexed
        )
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = PickerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_indexed" => Ok(IndexStatus::NotIndexed),
            "pending" => Ok(IndexStatus::Pending),
            "being_indexed" => Ok(IndexStatus::BeingIndexed),
            "indexed" | "parsed" => Ok(IndexStatus::Indexed),
            "error" => Ok(IndexStatus::Error),
            "deleted" => Ok(IndexStatus::Deleted),
            other => Err(PickerError::UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for IndexStatus {
    type Error = PickerError;

    fn try_from(value: String) -> Result<Self, PickerError> {
        value.parse()
    }
}

impl From<IndexStatus> for String {
    fn from(status: IndexStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Entry of an index-source listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedNode {
    #[serde(flatten)]
    pub node: ResourceNode,
    pub status: IndexStatus,
}

impl IndexedNode {
    pub fn new(node: ResourceNode, status: IndexStatus) -> Self {
        Self { node, status }
    }
}

/// Directory node annotated with its raw index status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedNode {
    #[serde(flatten)]
    pub node: ResourceNode,
    pub status: IndexStatus,
}

impl MergedNode {
    pub fn path(&self) -> &str {
        &self.node.path
    }

    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn is_dir(&self) -> bool {
        self.node.kind.is_dir()
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(data: Vec<T>) -> Self {
        Self {
            data,
            next_cursor: None,
        }
    }
}

impl<T: Clone> Page<T> {
    /// Page of `items` starting at the offset encoded in `cursor`.
    pub fn at_offset(items: &[T], cursor: Option<&str>, page_size: usize) -> Result<Self, PickerError> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| PickerError::server(format!("invalid cursor {c:?}")))?,
            None => 0,
        };
        let start = offset.min(items.len());
        let end = start.saturating_add(page_size.max(1)).min(items.len());
        Ok(Self {
            data: items[start..end].to_vec(),
            next_cursor: (end < items.len()).then(|| end.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_statuses() {
        assert_eq!("parsed".parse::<IndexStatus>().unwrap(), IndexStatus::Indexed);
        assert_eq!(
            "being_indexed".parse::<IndexStatus>().unwrap(),
            IndexStatus::BeingIndexed
        );
        assert_eq!(
            "resyncing".parse::<IndexStatus>(),
            Err(PickerError::UnknownStatus("resyncing".into()))
        );
        assert_eq!(
            IndexStatus::try_from("error".to_string()),
            Ok(IndexStatus::Error)
        );
    }

    #[test]
    fn rejects_unknown_status_in_json() {
        let ok: IndexedNode = serde_json::from_str(
            r#"{"id":"f1","path":"/a.txt","kind":"file","status":"pending"}"#,
        )
        .unwrap();
        assert_eq!(ok.status, IndexStatus::Pending);

        let bad = serde_json::from_str::<IndexedNode>(
            r#"{"id":"f1","path":"/a.txt","kind":"file","status":"queued"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn offset_pages_cover_every_item_once() {
        let items: Vec<u32> = (0..5).collect();
        let first = Page::at_offset(&items, None, 3).unwrap();
        assert_eq!(first.data, vec![0, 1, 2]);
        let second = Page::at_offset(&items, first.next_cursor.as_deref(), 3).unwrap();
        assert_eq!(second, Page::last(vec![3, 4]));
        assert!(Page::at_offset(&items, Some("x"), 3).is_err());
    }

    #[test]
    fn only_real_progress_confirms() {
        assert!(!IndexStatus::Error.confirms_rebuild());
        assert!(!IndexStatus::NotIndexed.confirms_rebuild());
        assert!(IndexStatus::Indexed.confirms_rebuild());
        assert!(!IndexStatus::Indexed.is_in_flight());
    }
}
