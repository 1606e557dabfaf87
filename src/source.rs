//! Collaborator interfaces for the two remote sources.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{IndexedNode, Page, ResourceNode};

/// Ground truth for which files exist.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// One level of children of `folder_id` (`None` is the root).
    async fn list_children(
        &self,
        folder_id: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Page<ResourceNode>>;
}

/// Service that ingests selected files and reports their processing status.
#[async_trait]
pub trait IndexSource: Send + Sync {
    /// Indexed children of `path` in `index_id`. Absent nodes are not indexed.
    async fn list_indexed(
        &self,
        index_id: &str,
        path: &str,
        cursor: Option<&str>,
    ) -> Result<Page<IndexedNode>>;

    /// Replace the contents of `index_id` with `file_ids`, returning the new
    /// index id. Not atomic server-side.
    async fn submit_rebuild(&self, index_id: &str, file_ids: &[String]) -> Result<String>;

    async fn delete_resource(&self, index_id: &str, path: &str) -> Result<()>;
}

pub type SharedDirectory = Arc<dyn DirectorySource>;
pub type SharedIndex = Arc<dyn IndexSource>;

/// Follow `next_cursor` until the listing is exhausted.
pub async fn list_all_children(
    source: &dyn DirectorySource,
    folder_id: Option<&str>,
) -> Result<Vec<ResourceNode>> {
    let mut nodes = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = source.list_children(folder_id, cursor.as_deref()).await?;
        nodes.extend(page.data);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(nodes),
        }
    }
}

pub async fn list_all_indexed(
    source: &dyn IndexSource,
    index_id: &str,
    path: &str,
) -> Result<Vec<IndexedNode>> {
    let mut nodes = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = source.list_indexed(index_id, path, cursor.as_deref()).await?;
        nodes.extend(page.data);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(nodes),
        }
    }
}
