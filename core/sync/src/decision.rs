//! Copy-or-skip decision for files.

use drivemigrate_common::Item;

/// Why a file is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyReason {
    /// Nothing with that name exists at the destination.
    Missing,
    /// Same-named items exist, but none of the same kind.
    KindMismatch,
    /// Checksum comparison is on and the content hashes differ.
    ChecksumMismatch,
    /// The source was modified after the destination item.
    SourceNewer,
}

/// Outcome of comparing a source file with same-named destination items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDecision<'a> {
    /// Copy the source.
    Copy(CopyReason),
    /// The destination is current; `current` is the item to keep.
    Skip {
        /// Freshest same-kind destination item.
        current: &'a Item,
    },
}

impl CopyDecision<'_> {
    /// Whether the source must be copied.
    pub fn is_copy(&self) -> bool {
        matches!(self, CopyDecision::Copy(_))
    }
}

/// Decide whether `source` must be copied over the same-named `existing` items.
///
/// The source is compared against the most recently modified existing item
/// of the same kind. Hashes only count when `compare_checksums` is set and
/// both sides have one; a strictly newer source always triggers a copy.
pub fn decide_copy<'a>(
    source: &Item,
    existing: &'a [Item],
    compare_checksums: bool,
) -> CopyDecision<'a> {
    if existing.is_empty() {
        return CopyDecision::Copy(CopyReason::Missing);
    }

    let class = source.kind.class();
    let current = existing
        .iter()
        .filter(|item| item.kind.class() == class)
        .max_by_key(|item| item.modified_time);

    let Some(current) = current else {
        return CopyDecision::Copy(CopyReason::KindMismatch);
    };

    if compare_checksums {
        if let (Some(src), Some(dst)) = (&source.content_hash, &current.content_hash) {
            if src != dst {
                return CopyDecision::Copy(CopyReason::ChecksumMismatch);
            }
        }
    }

    if source.modified_time > current.modified_time {
        return CopyDecision::Copy(CopyReason::SourceNewer);
    }

    CopyDecision::Skip { current }
}
