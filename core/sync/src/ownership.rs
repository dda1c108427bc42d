//! Ownership enumeration over a remote subtree.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use drivemigrate_common::{Error, Item, Permission, RelativePath, Result, Role};
use drivemigrate_storage::{DirectoryLister, RemoteStore, DEFAULT_PAGE_SIZE};

use crate::sink::OwnerSink;

/// Default number of concurrent permission lookups.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Owner e-mail to the links of the items they own.
pub type OwnerMap = BTreeMap<String, BTreeSet<String>>;

/// Result of an ownership enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OwnershipReport {
    /// Who owns what.
    pub owners: OwnerMap,
    /// Items whose sharing settings could not be read.
    pub insufficient_permissions: BTreeSet<String>,
    /// Non-folder items examined.
    pub files_scanned: usize,
    /// Folders listed.
    pub folders_scanned: usize,
}

/// Walks a subtree and records the owners of every non-folder item.
///
/// Folders are visited breadth-first. Within one folder the permission
/// lookups run concurrently, bounded by `concurrency`; their results are
/// folded into the report by the calling task alone.
pub struct OwnershipEnumerator<S: RemoteStore + ?Sized> {
    store: Arc<S>,
    concurrency: usize,
    page_size: u32,
}

impl<S: RemoteStore + ?Sized> OwnershipEnumerator<S> {
    /// Create an enumerator over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Bound the number of in-flight permission lookups.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Override the listing page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Enumerate owners below `root`, streaming each new pair into `sink`.
    ///
    /// # Errors
    /// - An item has no owner at all (`Consistency`)
    /// - Any remote failure other than `PermissionDenied`, wrapped with its path
    /// - The sink fails to record a pair
    pub async fn run(
        &self,
        root: &str,
        mut sink: Option<&mut dyn OwnerSink>,
    ) -> Result<OwnershipReport> {
        let lister =
            DirectoryLister::new(self.store.as_ref()).with_page_size(self.page_size);
        let mut report = OwnershipReport::default();
        let mut folders = VecDeque::from([(RelativePath::root(), root.to_string())]);

        info!("Enumerating owners below {}", root);

        while let Some((path, folder_id)) = folders.pop_front() {
            let children = lister
                .collect_children(&folder_id)
                .await
                .map_err(|err| err.at_path(path.to_string()))?;
            report.folders_scanned += 1;

            let mut files = Vec::new();
            for item in children {
                let item_path = path.join(&item.name);
                if item.is_folder() {
                    folders.push_back((item_path, item.id));
                } else {
                    files.push((item_path, item));
                }
            }
            debug!("'{}': {} items to inspect", path, files.len());

            let mut lookups = stream::iter(files.into_iter().map(|(path, item)| async move {
                let permissions = self.store.list_permissions(&item.id).await;
                (path, item, permissions)
            }))
            .buffer_unordered(self.concurrency);

            while let Some((path, item, permissions)) = lookups.next().await {
                report.files_scanned += 1;

                let permissions = match permissions {
                    Ok(permissions) => permissions,
                    Err(err) if err.is_permission_denied() => {
                        warn!("Insufficient permissions for '{}' ({})", path, item.id);
                        report.insufficient_permissions.insert(item.id);
                        continue;
                    }
                    Err(err) => {
                        error!("Owner lookup failed at '{}': {}", path, err);
                        return Err(err.at_path(path.to_string()));
                    }
                };

                let owners = owners_of(&item, &permissions);
                if owners.is_empty() {
                    return Err(Error::Consistency(format!("Item {} has no owner", item.id))
                        .at_path(path.to_string()));
                }

                let link = item.link();
                for owner in owners {
                    let added = report
                        .owners
                        .entry(owner.clone())
                        .or_default()
                        .insert(link.clone());
                    if let (true, Some(sink)) = (added, sink.as_mut()) {
                        sink.record(&owner, &link)?;
                    }
                }
            }
        }

        info!(
            "Found {} owners across {} items ({} unreadable)",
            report.owners.len(),
            report.files_scanned,
            report.insufficient_permissions.len()
        );
        Ok(report)
    }
}

/// Owner e-mails from the permission list, falling back to the item's
/// embedded owners.
fn owners_of(item: &Item, permissions: &[Permission]) -> BTreeSet<String> {
    let owners: BTreeSet<String> = permissions
        .iter()
        .filter(|p| p.role == Role::Owner)
        .filter_map(|p| p.email.clone())
        .collect();

    if owners.is_empty() {
        item.owners.iter().cloned().collect()
    } else {
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivemigrate_storage::MemoryStore;

    fn enumerator(store: &Arc<MemoryStore>) -> OwnershipEnumerator<MemoryStore> {
        OwnershipEnumerator::new(store.clone())
    }

    #[tokio::test]
    async fn test_denied_item_is_recorded_and_skipped() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        let a = store.add_file("a.txt", &root.id, None);
        let b = store.add_file("b.txt", &root.id, None);
        let c = store.add_file("c.txt", &root.id, None);
        store.set_owners(&a.id, &["alice@example.com"]);
        store.set_owners(&b.id, &["bob@example.com"]);
        store.deny_permissions(&c.id);

        let report = enumerator(&store).run(&root.id, None).await.unwrap();

        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.owners.len(), 2);
        assert!(report.owners["alice@example.com"].contains(&a.link()));
        assert!(report.owners["bob@example.com"].contains(&b.link()));
        assert_eq!(
            report.insufficient_permissions,
            BTreeSet::from([c.id.clone()])
        );
    }

    #[tokio::test]
    async fn test_walks_nested_folders() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        let sub = store.add_folder("sub", &root.id);
        let deeper = store.add_folder("deeper", &sub.id);
        let top = store.add_file("top.txt", &root.id, None);
        let deep = store.add_file("deep.txt", &deeper.id, None);
        store.set_owners(&top.id, &["alice@example.com"]);
        store.set_owners(&deep.id, &["alice@example.com"]);

        let report = enumerator(&store)
            .with_concurrency(2)
            .run(&root.id, None)
            .await
            .unwrap();

        assert_eq!(report.folders_scanned, 3);
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.owners["alice@example.com"].len(), 2);
    }

    #[tokio::test]
    async fn test_permission_owner_preferred_over_embedded() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        let file = store.add_file("a.txt", &root.id, None);
        store.set_owners(&file.id, &["embedded@example.com"]);
        store.set_permissions(
            &file.id,
            vec![
                Permission::user("real@example.com", Role::Owner),
                Permission::user("editor@example.com", Role::Writer),
            ],
        );

        let report = enumerator(&store).run(&root.id, None).await.unwrap();

        assert_eq!(
            report.owners.keys().collect::<Vec<_>>(),
            vec!["real@example.com"]
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_embedded_owners() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        let file = store.add_file("a.txt", &root.id, None);
        store.set_owners(&file.id, &["embedded@example.com"]);
        store.set_permissions(
            &file.id,
            vec![Permission::user("editor@example.com", Role::Writer)],
        );

        let report = enumerator(&store).run(&root.id, None).await.unwrap();
        assert!(report.owners.contains_key("embedded@example.com"));
    }

    #[tokio::test]
    async fn test_ownerless_item_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        store.add_file("orphan.txt", &root.id, None);

        let err = enumerator(&store).run(&root.id, None).await.unwrap_err();

        assert!(matches!(err.root_cause(), Error::Consistency(_)));
        match err {
            Error::AtPath { path, .. } => assert_eq!(path, "orphan.txt"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        store.fail_next(Error::Api {
            status: 500,
            message: "backend error".to_string(),
        });

        let err = enumerator(&store).run(&root.id, None).await.unwrap_err();
        assert!(matches!(err.root_cause(), Error::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_sink_receives_each_pair_once() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        let a = store.add_file("a.txt", &root.id, None);
        let b = store.add_file("b.txt", &root.id, None);
        store.set_owners(&a.id, &["alice@example.com", "bob@example.com"]);
        store.set_owners(&b.id, &["alice@example.com"]);

        let mut pairs: Vec<(String, String)> = Vec::new();
        let report = enumerator(&store)
            .run(&root.id, Some(&mut pairs))
            .await
            .unwrap();

        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("bob@example.com".to_string(), a.link())));
        let total: usize = report.owners.values().map(BTreeSet::len).sum();
        assert_eq!(total, pairs.len());
    }

    #[tokio::test]
    async fn test_shortcuts_are_inspected() {
        let store = Arc::new(MemoryStore::new());
        let root = store.add_root("root");
        let elsewhere = store.add_root("elsewhere");
        let link = store.add_shortcut("link", &root.id, &elsewhere);
        store.set_owners(&link.id, &["alice@example.com"]);

        let report = enumerator(&store).run(&root.id, None).await.unwrap();
        assert_eq!(report.files_scanned, 1);
        assert!(report.owners["alice@example.com"].contains(&link.link()));
    }
}
