//! Session-aware store that reconnects once on expiry.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use drivemigrate_common::{Item, NewItem, Permission, Query, Result};

use crate::store::{Connector, FileList, RemoteStore};

/// A [`RemoteStore`] that re-establishes its session when it expires.
///
/// When a call fails with `SessionExpired`, the connector is asked for a
/// new store, which replaces the current one, and the same call is retried
/// exactly once. A second failure, and every other kind of error, reaches
/// the caller unchanged.
pub struct SessionStore<C: Connector> {
    connector: C,
    current: RwLock<Arc<C::Store>>,
    reconnects: AtomicUsize,
}

impl<C: Connector> SessionStore<C> {
    /// Connect for the first time.
    ///
    /// # Errors
    /// - Whatever the connector reports; credential failures are fatal
    pub async fn connect(connector: C) -> Result<Self> {
        let store = connector.connect().await?;
        Ok(Self {
            connector,
            current: RwLock::new(Arc::new(store)),
            reconnects: AtomicUsize::new(0),
        })
    }

    /// Number of times the session has been re-established.
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Replace `stale` with a fresh store, unless another caller already did.
    async fn reconnect(&self, stale: &Arc<C::Store>) -> Result<Arc<C::Store>> {
        let mut current = self.current.write().await;
        if !Arc::ptr_eq(&current, stale) {
            return Ok(current.clone());
        }

        let store = Arc::new(self.connector.connect().await?);
        *current = store.clone();
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        info!("Session re-established");
        Ok(store)
    }

    async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn(Arc<C::Store>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = self.current.read().await.clone();

        match f(store.clone()).await {
            Err(err) if err.is_session_expired() => {
                warn!("{} failed ({}); reconnecting and retrying once", operation, err);
                let fresh = self.reconnect(&store).await?;
                f(fresh).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl<C: Connector> RemoteStore for SessionStore<C> {
    async fn list(
        &self,
        query: &Query,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FileList> {
        self.call("list", |s| async move {
            s.list(query, page_token, page_size).await
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Item> {
        self.call("get", |s| async move { s.get(id).await }).await
    }

    async fn create(&self, item: &NewItem) -> Result<Item> {
        self.call("create", |s| async move { s.create(item).await })
            .await
    }

    async fn copy(&self, source_id: &str, new_parents: &[String], new_name: &str) -> Result<Item> {
        self.call("copy", |s| async move {
            s.copy(source_id, new_parents, new_name).await
        })
        .await
    }

    async fn update(
        &self,
        id: &str,
        add_parents: &[String],
        remove_parents: &[String],
    ) -> Result<Item> {
        self.call("update", |s| async move {
            s.update(id, add_parents, remove_parents).await
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.call("delete", |s| async move { s.delete(id).await })
            .await
    }

    async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>> {
        self.call("list_permissions", |s| async move {
            s.list_permissions(id).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use drivemigrate_common::Error;
    use std::sync::Mutex;

    /// Hands out pre-built stores and counts connections.
    struct QueueConnector {
        stores: Mutex<Vec<MemoryStore>>,
        connects: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl QueueConnector {
        fn new(stores: Vec<MemoryStore>) -> Self {
            Self {
                stores: Mutex::new(stores),
                connects: AtomicUsize::new(0),
                fail_after: None,
            }
        }
    }

    #[async_trait]
    impl Connector for QueueConnector {
        type Store = MemoryStore;

        async fn connect(&self) -> Result<MemoryStore> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(Error::Credential("refresh token revoked".to_string()));
            }
            let mut stores = self.stores.lock().unwrap();
            if stores.is_empty() {
                Ok(MemoryStore::new())
            } else {
                Ok(stores.remove(0))
            }
        }
    }

    fn expiring_store() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let root = store.add_root("root");
        store.fail_next(Error::SessionExpired("ssl session expired".to_string()));
        (store, root.id)
    }

    #[tokio::test]
    async fn test_retries_once_after_reconnect() {
        let (first, _) = expiring_store();
        let second = MemoryStore::new();
        let root = second.add_root("root");

        let session = SessionStore::connect(QueueConnector::new(vec![first, second]))
            .await
            .unwrap();

        let item = session.get(&root.id).await.unwrap();
        assert_eq!(item.name, "root");
        assert_eq!(session.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_second_expiry_propagates() {
        let (first, id) = expiring_store();
        let second = MemoryStore::new();
        second.fail_next(Error::SessionExpired("again".to_string()));

        let session = SessionStore::connect(QueueConnector::new(vec![first, second]))
            .await
            .unwrap();

        let err = session.get(&id).await.unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(session.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let store = MemoryStore::new();
        store.fail_next(Error::PermissionDenied("forbidden".to_string()));

        let session = SessionStore::connect(QueueConnector::new(vec![store]))
            .await
            .unwrap();

        let err = session.get("anything").await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(session.reconnects(), 0);
    }

    #[tokio::test]
    async fn test_credential_failure_on_reconnect_is_fatal() {
        let (first, id) = expiring_store();
        let mut connector = QueueConnector::new(vec![first]);
        connector.fail_after = Some(1);

        let session = SessionStore::connect(connector).await.unwrap();
        let err = session.get(&id).await.unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
    }
}
