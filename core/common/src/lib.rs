//! Common types shared across the drivemigrate crates.
//!
//! This module provides the remote item model, the query predicate builder
//! and the error taxonomy every other crate reports through.

pub mod error;
pub mod item;
pub mod query;
pub mod types;

pub use error::{Error, Result};
pub use item::{
    DriveFile, Item, ItemKind, KindClass, NewItem, NewKind, Permission, Role, TargetKind,
    FOLDER_MIME_TYPE, SHORTCUT_MIME_TYPE,
};
pub use query::Query;
pub use types::RelativePath;
