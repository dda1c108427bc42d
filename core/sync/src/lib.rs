//! drivemigrate sync engines
//!
//! This module provides the two traversal passes over the remote tree:
//! - Tree synchronization: mirror a source subtree into a destination
//!   subtree, copying or moving files and reusing existing folders
//! - Ownership enumeration: map every owner to the links of the files
//!   they own, tolerating items whose sharing settings are unreadable

pub mod decision;
pub mod engine;
pub mod ownership;
pub mod sink;

// Re-export main types
pub use decision::{decide_copy, CopyDecision, CopyReason};
pub use engine::{SyncOptions, SyncReport, TransferMode, TreeSync};
pub use ownership::{OwnerMap, OwnershipEnumerator, OwnershipReport, DEFAULT_CONCURRENCY};
pub use sink::{read_owner_rows, CsvOwnerSink, OwnerSink};
