//! Paginated directory listing.

use futures::stream::{self, Stream, TryStreamExt};
use std::pin::Pin;

use drivemigrate_common::{Error, Item, Query, Result};

use crate::store::RemoteStore;

/// Largest page the Drive API hands out.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Lazy sequence of listed items.
pub type ItemStream<'a> = Pin<Box<dyn Stream<Item = Result<Item>> + Send + 'a>>;

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Turns paged `list` calls into one logical sequence of items.
///
/// Every call starts a fresh cursor, so streams are restartable by calling
/// again. Pages are fetched only as the stream is polled.
pub struct DirectoryLister<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    page_size: u32,
}

impl<'a, S: RemoteStore + ?Sized> DirectoryLister<'a, S> {
    /// Lister with the default page size.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Non-trashed children of `folder_id`.
    pub fn list_children(&self, folder_id: &str) -> ItemStream<'a> {
        self.list_matching(Query::children_of(folder_id))
    }

    /// Items matching a scoped query, across all pages.
    pub fn list_matching(&self, query: Query) -> ItemStream<'a> {
        let store = self.store;
        let page_size = self.page_size;

        let pages = stream::try_unfold(Cursor::Start, move |cursor| {
            let query = query.clone();
            async move {
                let token = match cursor {
                    Cursor::Start => None,
                    Cursor::Next(token) => Some(token),
                    Cursor::Done => return Ok(None),
                };

                let page = store.list(&query, token.as_deref(), page_size).await?;
                let next = match page.next_page_token {
                    Some(next) if token.as_deref() == Some(next.as_str()) => {
                        return Err(Error::Consistency(format!(
                            "Listing of '{}' returned the same page token twice",
                            query.parent()
                        )));
                    }
                    Some(next) => Cursor::Next(next),
                    None => Cursor::Done,
                };

                let items = stream::iter(page.files.into_iter().map(Ok::<Item, Error>));
                Ok(Some((items, next)))
            }
        });

        Box::pin(pages.try_flatten())
    }

    /// Collect every child of `folder_id`.
    pub async fn collect_children(&self, folder_id: &str) -> Result<Vec<Item>> {
        self.list_children(folder_id).try_collect().await
    }

    /// Collect every item matching `query`.
    pub async fn collect_matching(&self, query: Query) -> Result<Vec<Item>> {
        self.list_matching(query).try_collect().await
    }
}
