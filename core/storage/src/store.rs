//! Remote store trait definition.

use async_trait::async_trait;

use drivemigrate_common::{Item, NewItem, Permission, Query, Result};

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct FileList {
    /// Items on this page.
    pub files: Vec<Item>,
    /// Cursor for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Operations the engines need from the remote hierarchical store.
///
/// Implementations must make items from shared drives visible to every
/// call and must keep error classification intact (`PermissionDenied`,
/// `NotFound`, `SessionExpired`) so callers can branch on cause.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch one page of items matching `query`.
    ///
    /// # Preconditions
    /// - `page_token` is `None` or a token returned by a previous call with the same query
    async fn list(
        &self,
        query: &Query,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FileList>;

    /// Get item metadata by ID.
    ///
    /// # Errors
    /// - Item not found
    async fn get(&self, id: &str) -> Result<Item>;

    /// Create a folder or shortcut.
    async fn create(&self, item: &NewItem) -> Result<Item>;

    /// Copy a file's content into a new item.
    ///
    /// # Postconditions
    /// - A new item named `new_name` exists under `new_parents`
    /// - The source is unchanged
    async fn copy(&self, source_id: &str, new_parents: &[String], new_name: &str) -> Result<Item>;

    /// Change an item's parent set.
    async fn update(
        &self,
        id: &str,
        add_parents: &[String],
        remove_parents: &[String],
    ) -> Result<Item>;

    /// Permanently delete an item.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Full permission list of an item.
    ///
    /// # Errors
    /// - `PermissionDenied` when the caller may not read the item's sharing settings
    async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>>;
}

/// Produces connected store values.
///
/// Called once at startup and again each time a session expires; every
/// call returns a fresh client rather than mutating a shared one.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Store type this connector produces.
    type Store: RemoteStore;

    /// Establish a new session.
    ///
    /// # Errors
    /// - `Credential` when credentials cannot be obtained; never retried
    async fn connect(&self) -> Result<Self::Store>;
}
