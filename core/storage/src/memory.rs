//! In-memory remote store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use drivemigrate_common::{
    Error, Item, ItemKind, NewItem, NewKind, Permission, Query, Result, Role, TargetKind,
};

use crate::store::{FileList, RemoteStore};

/// A call recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `list` under `parent`.
    List {
        /// Parent the query was scoped to.
        parent: String,
        /// Name filter of the query.
        name: Option<String>,
        /// Page token passed in.
        page_token: Option<String>,
    },
    /// `get`.
    Get(String),
    /// `create`.
    Create {
        /// Name of the new item.
        name: String,
        /// First parent of the new item.
        parent: String,
    },
    /// `copy`.
    Copy {
        /// Copied item.
        source: String,
        /// Name of the copy.
        name: String,
        /// First parent of the copy.
        parent: String,
    },
    /// `update`.
    Update {
        /// Updated item.
        id: String,
        /// Parents added.
        add: Vec<String>,
        /// Parents removed.
        remove: Vec<String>,
    },
    /// `delete`.
    Delete(String),
    /// `list_permissions`.
    ListPermissions(String),
}

impl Call {
    /// Whether this call changes remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::Create { .. } | Call::Copy { .. } | Call::Update { .. } | Call::Delete(_)
        )
    }
}

#[derive(Debug, Clone)]
struct Entry {
    item: Item,
    trashed: bool,
}

#[derive(Default)]
struct State {
    /// Insertion order doubles as listing order.
    entries: Vec<Entry>,
    next_id: u64,
    ticks: i64,
    calls: Vec<Call>,
    permissions: HashMap<String, Vec<Permission>>,
    denied: HashSet<String>,
    failures: VecDeque<Error>,
}

impl State {
    fn now(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        base_time() + Duration::seconds(self.ticks)
    }

    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn find(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.item.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.item.id == id)
    }

    fn insert(&mut self, item: Item) -> Item {
        self.entries.push(Entry {
            item: item.clone(),
            trashed: false,
        });
        item
    }

    fn new_item(&mut self, name: &str, kind: ItemKind, parent: Option<&str>) -> Item {
        let id = self.fresh_id();
        let modified_time = self.now();
        Item {
            id,
            name: name.to_string(),
            kind,
            parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            modified_time,
            size: None,
            content_hash: None,
            owners: Vec::new(),
            web_view_link: None,
        }
    }

    /// Record a call and return a queued failure, if any.
    fn enter(&mut self, call: Call) -> Result<()> {
        self.calls.push(call);
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// In-memory remote store.
///
/// Useful for testing. Timestamps come from a logical clock that advances
/// one second per mutation, so anything created later is strictly newer.
/// Every call is recorded and can be inspected with [`MemoryStore::calls`].
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a parentless folder to act as a traversal root.
    pub fn add_root(&self, name: &str) -> Item {
        let mut state = self.write();
        let item = state.new_item(name, ItemKind::Folder, None);
        state.insert(item)
    }

    /// Add a folder under `parent`.
    pub fn add_folder(&self, name: &str, parent: &str) -> Item {
        let mut state = self.write();
        let item = state.new_item(name, ItemKind::Folder, Some(parent));
        state.insert(item)
    }

    /// Add a plain-text file with the given content hash under `parent`.
    pub fn add_file(&self, name: &str, parent: &str, content_hash: Option<&str>) -> Item {
        self.add_file_with(name, parent, "text/plain", content_hash)
    }

    /// Add a file with an explicit MIME type.
    pub fn add_file_with(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        content_hash: Option<&str>,
    ) -> Item {
        let mut state = self.write();
        let mut item = state.new_item(
            name,
            ItemKind::File {
                mime_type: mime_type.to_string(),
            },
            Some(parent),
        );
        item.size = Some(0);
        item.content_hash = content_hash.map(str::to_string);
        state.insert(item)
    }

    /// Add a shortcut under `parent` pointing at `target`.
    pub fn add_shortcut(&self, name: &str, parent: &str, target: &Item) -> Item {
        let target_kind = match &target.kind {
            ItemKind::Folder => TargetKind::Folder,
            other => TargetKind::File {
                mime_type: other.mime_type().to_string(),
            },
        };
        let mut state = self.write();
        let item = state.new_item(
            name,
            ItemKind::Shortcut {
                target_id: target.id.clone(),
                target_kind,
            },
            Some(parent),
        );
        state.insert(item)
    }

    /// Add `count` files named `prefix-<n>` under `parent`.
    pub fn add_many_files(&self, prefix: &str, parent: &str, count: usize) -> Vec<Item> {
        (0..count)
            .map(|n| self.add_file(&format!("{}-{}", prefix, n), parent, None))
            .collect()
    }

    /// Bump an item's modification time to "now".
    pub fn touch(&self, id: &str) {
        let mut state = self.write();
        let now = state.now();
        if let Some(entry) = state.find_mut(id) {
            entry.item.modified_time = now;
        }
    }

    /// Re-parent an item under `parent`; it then lists after every existing
    /// child of `parent`.
    pub fn relocate(&self, id: &str, parent: &str) {
        let mut state = self.write();
        if let Some(pos) = state.entries.iter().position(|e| e.item.id == id) {
            let mut entry = state.entries.remove(pos);
            entry.item.parents = vec![parent.to_string()];
            state.entries.push(entry);
        }
    }

    /// Replace an item's content hash.
    pub fn set_content_hash(&self, id: &str, content_hash: Option<&str>) {
        if let Some(entry) = self.write().find_mut(id) {
            entry.item.content_hash = content_hash.map(str::to_string);
        }
    }

    /// Set the embedded owner e-mails of an item.
    pub fn set_owners(&self, id: &str, owners: &[&str]) {
        if let Some(entry) = self.write().find_mut(id) {
            entry.item.owners = owners.iter().map(|o| o.to_string()).collect();
        }
    }

    /// Set the permission list returned for an item.
    pub fn set_permissions(&self, id: &str, permissions: Vec<Permission>) {
        self.write().permissions.insert(id.to_string(), permissions);
    }

    /// Make `list_permissions` on `id` fail with `PermissionDenied`.
    pub fn deny_permissions(&self, id: &str) {
        self.write().denied.insert(id.to_string());
    }

    /// Move an item to the trash.
    pub fn trash(&self, id: &str) {
        if let Some(entry) = self.write().find_mut(id) {
            entry.trashed = true;
        }
    }

    /// Fail the next call (of any kind) with `error`.
    pub fn fail_next(&self, error: Error) {
        self.write().failures.push_back(error);
    }

    /// Look up an item regardless of trash state.
    pub fn item(&self, id: &str) -> Option<Item> {
        self.read().find(id).map(|e| e.item.clone())
    }

    /// Non-trashed children of `parent`, in insertion order.
    pub fn children(&self, parent: &str) -> Vec<Item> {
        self.read()
            .entries
            .iter()
            .filter(|e| !e.trashed && e.item.parents.iter().any(|p| p == parent))
            .map(|e| e.item.clone())
            .collect()
    }

    /// Non-trashed child of `parent` named `name`, if exactly one exists.
    pub fn child(&self, parent: &str, name: &str) -> Option<Item> {
        let mut matches = self
            .children(parent)
            .into_iter()
            .filter(|i| i.name == name);
        let first = matches.next()?;
        match matches.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.read().calls.clone()
    }

    /// Number of mutating calls made so far.
    pub fn mutation_count(&self) -> usize {
        self.read().calls.iter().filter(|c| c.is_mutation()).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.write().calls.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(
        &self,
        query: &Query,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FileList> {
        let mut state = self.write();
        state.enter(Call::List {
            parent: query.parent().to_string(),
            name: query.name().map(str::to_string),
            page_token: page_token.map(str::to_string),
        })?;

        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid page token: {}", token)))?,
            None => 0,
        };
        let page_size = page_size.clamp(1, 1000) as usize;

        let matching: Vec<Item> = state
            .entries
            .iter()
            .filter(|e| !e.trashed && query.matches(&e.item))
            .map(|e| e.item.clone())
            .collect();

        let end = (offset + page_size).min(matching.len());
        let files = matching.get(offset..end).map(<[Item]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(FileList {
            files,
            next_page_token,
        })
    }

    async fn get(&self, id: &str) -> Result<Item> {
        let mut state = self.write();
        state.enter(Call::Get(id.to_string()))?;
        state
            .find(id)
            .map(|e| e.item.clone())
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", id)))
    }

    async fn create(&self, item: &NewItem) -> Result<Item> {
        let mut state = self.write();
        state.enter(Call::Create {
            name: item.name.clone(),
            parent: item.parents.first().cloned().unwrap_or_default(),
        })?;

        for parent in &item.parents {
            match state.find(parent) {
                Some(e) if e.item.is_folder() => {}
                Some(_) => return Err(Error::InvalidInput("Parent is not a folder".to_string())),
                None => return Err(Error::NotFound(format!("Parent not found: {}", parent))),
            }
        }

        let kind = match &item.kind {
            NewKind::Folder => ItemKind::Folder,
            NewKind::Shortcut { target_id } => {
                let target = state
                    .find(target_id)
                    .ok_or_else(|| Error::NotFound(format!("Target not found: {}", target_id)))?;
                let target_kind = match &target.item.kind {
                    ItemKind::Folder => TargetKind::Folder,
                    other => TargetKind::File {
                        mime_type: other.mime_type().to_string(),
                    },
                };
                ItemKind::Shortcut {
                    target_id: target_id.clone(),
                    target_kind,
                }
            }
        };

        let mut created = state.new_item(&item.name, kind, None);
        created.parents = item.parents.clone();
        Ok(state.insert(created))
    }

    async fn copy(&self, source_id: &str, new_parents: &[String], new_name: &str) -> Result<Item> {
        let mut state = self.write();
        state.enter(Call::Copy {
            source: source_id.to_string(),
            name: new_name.to_string(),
            parent: new_parents.first().cloned().unwrap_or_default(),
        })?;

        let source = state
            .find(source_id)
            .map(|e| e.item.clone())
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", source_id)))?;
        if source.is_folder() {
            return Err(Error::InvalidInput("Folders cannot be copied".to_string()));
        }

        let id = state.fresh_id();
        let modified_time = state.now();
        let copy = Item {
            id,
            name: new_name.to_string(),
            parents: new_parents.to_vec(),
            modified_time,
            web_view_link: None,
            ..source
        };
        Ok(state.insert(copy))
    }

    async fn update(
        &self,
        id: &str,
        add_parents: &[String],
        remove_parents: &[String],
    ) -> Result<Item> {
        let mut state = self.write();
        state.enter(Call::Update {
            id: id.to_string(),
            add: add_parents.to_vec(),
            remove: remove_parents.to_vec(),
        })?;

        let entry = state
            .find_mut(id)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", id)))?;
        entry.item.parents.retain(|p| !remove_parents.contains(p));
        for parent in add_parents {
            if !entry.item.parents.contains(parent) {
                entry.item.parents.push(parent.clone());
            }
        }
        Ok(entry.item.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.write();
        state.enter(Call::Delete(id.to_string()))?;

        let before = state.entries.len();
        state.entries.retain(|e| e.item.id != id);
        if state.entries.len() == before {
            return Err(Error::NotFound(format!("File not found: {}", id)));
        }
        Ok(())
    }

    async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>> {
        let mut state = self.write();
        state.enter(Call::ListPermissions(id.to_string()))?;

        if state.denied.contains(id) {
            return Err(Error::PermissionDenied(format!(
                "Insufficient permissions for {}",
                id
            )));
        }
        if let Some(permissions) = state.permissions.get(id) {
            return Ok(permissions.clone());
        }

        let entry = state
            .find(id)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", id)))?;
        Ok(entry
            .item
            .owners
            .iter()
            .map(|o| Permission::user(o.clone(), Role::Owner))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_pages() {
        let store = MemoryStore::new();
        let root = store.add_root("root");
        store.add_many_files("f", &root.id, 5);

        let query = Query::children_of(&root.id);
        let first = store.list(&query, None, 2).await.unwrap();
        assert_eq!(first.files.len(), 2);
        let token = first.next_page_token.unwrap();

        let second = store.list(&query, Some(&token), 2).await.unwrap();
        assert_eq!(second.files[0].name, "f-2");

        let last = store.list(&query, Some("4"), 2).await.unwrap();
        assert_eq!(last.files.len(), 1);
        assert!(last.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_list_skips_trashed_and_filters_name() {
        let store = MemoryStore::new();
        let root = store.add_root("root");
        let a = store.add_file("a.txt", &root.id, None);
        store.add_file("b.txt", &root.id, None);
        store.trash(&a.id);

        let all = store
            .list(&Query::children_of(&root.id), None, 100)
            .await
            .unwrap();
        assert_eq!(all.files.len(), 1);

        let named = store
            .list(&Query::children_of(&root.id).with_name("b.txt"), None, 100)
            .await
            .unwrap();
        assert_eq!(named.files[0].name, "b.txt");
    }

    #[tokio::test]
    async fn test_copy_is_newer() {
        let store = MemoryStore::new();
        let root = store.add_root("root");
        let dest = store.add_root("dest");
        let file = store.add_file("a.txt", &root.id, Some("h1"));

        let copy = store
            .copy(&file.id, &[dest.id.clone()], "a.txt")
            .await
            .unwrap();
        assert!(copy.modified_time > file.modified_time);
        assert_eq!(copy.content_hash.as_deref(), Some("h1"));
        assert_eq!(store.children(&dest.id).len(), 1);
    }

    #[tokio::test]
    async fn test_copy_folder_fails() {
        let store = MemoryStore::new();
        let root = store.add_root("root");
        let err = store.copy(&root.id, &[], "x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_update_moves_parents() {
        let store = MemoryStore::new();
        let src = store.add_root("src");
        let dest = store.add_root("dest");
        let file = store.add_file("a.txt", &src.id, None);

        store
            .update(&file.id, &[dest.id.clone()], &[src.id.clone()])
            .await
            .unwrap();
        assert!(store.children(&src.id).is_empty());
        assert_eq!(store.children(&dest.id)[0].id, file.id);
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let store = MemoryStore::new();
        let root = store.add_root("root");
        store.fail_next(Error::SessionExpired("boom".to_string()));

        assert!(store.get(&root.id).await.unwrap_err().is_session_expired());
        assert!(store.get(&root.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_permissions_default_to_owners() {
        let store = MemoryStore::new();
        let root = store.add_root("root");
        let file = store.add_file("a.txt", &root.id, None);
        store.set_owners(&file.id, &["a@example.com"]);

        let perms = store.list_permissions(&file.id).await.unwrap();
        assert_eq!(perms, vec![Permission::user("a@example.com", Role::Owner)]);

        store.deny_permissions(&file.id);
        assert!(store
            .list_permissions(&file.id)
            .await
            .unwrap_err()
            .is_permission_denied());
    }
}
