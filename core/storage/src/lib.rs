//! Remote store access for drivemigrate.
//!
//! This crate provides a trait-based interface to the remote hierarchical
//! store, the Google Drive implementation of it, the session wrapper that
//! reconnects on expired sessions, and the paginating directory lister.
//!
//! # Design Principles
//! - Every engine talks to [`RemoteStore`], never to HTTP directly
//! - Clients are plain values; reconnecting builds a new one through a [`Connector`]
//! - Errors keep their classification so callers can branch on cause

pub mod gdrive;
pub mod lister;
pub mod memory;
pub mod session;
pub mod store;

pub use gdrive::{DriveClient, DriveConnector};
pub use lister::{DirectoryLister, ItemStream, DEFAULT_PAGE_SIZE};
pub use memory::{Call, MemoryStore};
pub use session::SessionStore;
pub use store::{Connector, FileList, RemoteStore};
