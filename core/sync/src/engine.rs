//! Tree synchronizer that mirrors one remote subtree into another.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use drivemigrate_common::{
    Item, ItemKind, NewItem, Query, RelativePath, Result, TargetKind, FOLDER_MIME_TYPE,
    SHORTCUT_MIME_TYPE,
};
use drivemigrate_storage::{DirectoryLister, RemoteStore, DEFAULT_PAGE_SIZE};

use crate::decision::{decide_copy, CopyDecision};

/// How file content reaches the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Copy files, leaving the source untouched.
    #[default]
    Copy,
    /// Re-parent files and shortcuts into the destination.
    Move,
}

/// Configuration for a synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Copy or move.
    pub mode: TransferMode,
    /// Treat differing content hashes as a reason to copy.
    pub compare_checksums: bool,
    /// Descend into folders reached through shortcuts instead of
    /// recreating the shortcut.
    pub follow_shortcuts: bool,
    /// Page size used for every listing.
    pub page_size: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: TransferMode::Copy,
            compare_checksums: false,
            follow_shortcuts: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Destination folders created.
    pub folders_created: usize,
    /// Existing destination folders reused.
    pub folders_reused: usize,
    /// Files copied.
    pub files_copied: usize,
    /// Files and shortcuts re-parented.
    pub files_moved: usize,
    /// Files and shortcuts already current at the destination.
    pub files_skipped: usize,
    /// Shortcuts recreated at the destination.
    pub shortcuts_created: usize,
    /// Stale same-named destination items deleted.
    pub duplicates_removed: usize,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl SyncReport {
    /// Number of remote mutations the run performed.
    pub fn changes(&self) -> usize {
        self.folders_created
            + self.files_copied
            + self.files_moved
            + self.shortcuts_created
            + self.duplicates_removed
    }
}

/// One item waiting to be synchronized.
#[derive(Debug)]
struct SyncTask {
    /// Path relative to the source root, for diagnostics.
    path: RelativePath,
    /// Source item.
    item: Item,
    /// Folder the item was listed under.
    source_parent: String,
    /// Destination folder the item belongs in.
    dest_parent: String,
    /// Source folders expanded on the way to this item, root first.
    lineage: Arc<[String]>,
}

/// State of one breadth-first walk.
#[derive(Default)]
struct Walk {
    queue: VecDeque<SyncTask>,
    /// Destination folders created or reused by this run.
    destinations: HashSet<String>,
    report: SyncReport,
}

/// Mirrors a source subtree into a destination subtree.
///
/// Each run recomputes its plan from the current remote state, so running
/// it twice in a row performs no mutations the second time. Items are
/// processed one at a time in breadth-first order; a folder's children are
/// queued only once its destination counterpart exists.
pub struct TreeSync<S: RemoteStore + ?Sized> {
    store: Arc<S>,
    options: SyncOptions,
}

impl<S: RemoteStore + ?Sized> TreeSync<S> {
    /// Create a synchronizer over `store`.
    pub fn new(store: Arc<S>, options: SyncOptions) -> Self {
        Self { store, options }
    }

    /// Options this synchronizer runs with.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn lister(&self) -> DirectoryLister<'_, S> {
        DirectoryLister::new(self.store.as_ref()).with_page_size(self.options.page_size)
    }

    /// Synchronize the children of `source_root` into `dest_root`.
    ///
    /// # Errors
    /// - The first failing remote call aborts the run; the error is wrapped
    ///   with the relative path of the item being processed
    pub async fn run(&self, source_root: &str, dest_root: &str) -> Result<SyncReport> {
        let start = Instant::now();
        let mut walk = Walk::default();
        walk.destinations.insert(dest_root.to_string());

        info!(
            "Starting {:?} sync from {} to {}",
            self.options.mode, source_root, dest_root
        );

        let root = RelativePath::root();
        if let Err(err) = self
            .enqueue_children(&mut walk, &root, &[], source_root, dest_root)
            .await
        {
            error!("Sync aborted at '{}': {}", root, err);
            return Err(err.at_path(root.to_string()));
        }

        while let Some(task) = walk.queue.pop_front() {
            let path = task.path.to_string();
            if let Err(err) = self.process(&mut walk, task).await {
                error!("Sync aborted at '{}': {}", path, err);
                return Err(err.at_path(path));
            }
        }

        walk.report.duration = start.elapsed();
        info!(
            "Sync complete in {:?}: {} copied, {} moved, {} skipped, {} folders created",
            walk.report.duration,
            walk.report.files_copied,
            walk.report.files_moved,
            walk.report.files_skipped,
            walk.report.folders_created
        );
        Ok(walk.report)
    }

    async fn process(&self, walk: &mut Walk, task: SyncTask) -> Result<()> {
        debug!("Processing '{}'", task.path);

        match (&task.item.kind, self.options.mode) {
            (ItemKind::Folder, _) => {
                if walk.destinations.contains(&task.item.id) {
                    warn!("Skipping '{}': folder is a sync destination", task.path);
                    return Ok(());
                }
                let dest = self
                    .ensure_folder(walk, &task.item.name, &task.dest_parent)
                    .await?;
                self.enqueue_children(walk, &task.path, &task.lineage, &task.item.id, &dest.id)
                    .await
            }
            (_, TransferMode::Move) => self.move_item(walk, &task).await,
            (ItemKind::File { .. }, TransferMode::Copy) => {
                self.sync_file(walk, &task.item, &task.item.name, &task.dest_parent)
                    .await
            }
            (
                ItemKind::Shortcut {
                    target_id,
                    target_kind,
                },
                TransferMode::Copy,
            ) => {
                self.sync_alias(walk, &task, target_id, target_kind)
                    .await
            }
        }
    }

    /// Queue every child of `source_folder` for placement under `dest_folder`.
    ///
    /// `lineage` lists the source folders already expanded above
    /// `source_folder`.
    async fn enqueue_children(
        &self,
        walk: &mut Walk,
        path: &RelativePath,
        lineage: &[String],
        source_folder: &str,
        dest_folder: &str,
    ) -> Result<()> {
        let lineage: Arc<[String]> = lineage
            .iter()
            .cloned()
            .chain(std::iter::once(source_folder.to_string()))
            .collect();

        let mut children = self.lister().list_children(source_folder);
        while let Some(item) = children.try_next().await? {
            walk.queue.push_back(SyncTask {
                path: path.join(&item.name),
                item,
                source_parent: source_folder.to_string(),
                dest_parent: dest_folder.to_string(),
                lineage: lineage.clone(),
            });
        }
        Ok(())
    }

    /// Reuse the first same-named folder under `parent`, or create one.
    async fn ensure_folder(&self, walk: &mut Walk, name: &str, parent: &str) -> Result<Item> {
        let query = Query::children_of(parent)
            .with_name(name)
            .with_mime_type(FOLDER_MIME_TYPE);

        let existing = self.lister().list_matching(query).try_next().await?;
        let folder = match existing {
            Some(folder) => {
                walk.report.folders_reused += 1;
                folder
            }
            None => {
                let folder = self.store.create(&NewItem::folder(name, parent)).await?;
                debug!("Created folder '{}' ({})", name, folder.id);
                walk.report.folders_created += 1;
                folder
            }
        };

        walk.destinations.insert(folder.id.clone());
        Ok(folder)
    }

    /// Bring the destination copy of `source`, named `name`, up to date.
    async fn sync_file(
        &self,
        walk: &mut Walk,
        source: &Item,
        name: &str,
        dest_parent: &str,
    ) -> Result<()> {
        let existing = self
            .lister()
            .collect_matching(Query::children_of(dest_parent).with_name(name))
            .await?;

        match decide_copy(source, &existing, self.options.compare_checksums) {
            CopyDecision::Copy(reason) => {
                let copied = self
                    .store
                    .copy(&source.id, &[dest_parent.to_string()], name)
                    .await?;
                debug!("Copied '{}' ({:?})", name, reason);
                walk.report.files_copied += 1;

                for stale in existing
                    .iter()
                    .filter(|item| !item.is_folder() && item.id != copied.id)
                {
                    self.store.delete(&stale.id).await?;
                    walk.report.duplicates_removed += 1;
                }
            }
            CopyDecision::Skip { current } => {
                debug!("'{}' is current ({})", name, current.id);
                walk.report.files_skipped += 1;
            }
        }
        Ok(())
    }

    async fn sync_alias(
        &self,
        walk: &mut Walk,
        task: &SyncTask,
        target_id: &str,
        target_kind: &TargetKind,
    ) -> Result<()> {
        match target_kind {
            TargetKind::File { .. } => {
                let target = self.store.get(target_id).await?;
                self.sync_file(walk, &target, &task.item.name, &task.dest_parent)
                    .await
            }
            TargetKind::Folder if self.options.follow_shortcuts => {
                let expanded = task.lineage.iter().any(|id| id == target_id);
                if expanded || walk.destinations.contains(target_id) {
                    warn!("Skipping '{}': shortcut leads back into the walk", task.path);
                    return Ok(());
                }
                let dest = self
                    .ensure_folder(walk, &task.item.name, &task.dest_parent)
                    .await?;
                self.enqueue_children(walk, &task.path, &task.lineage, target_id, &dest.id)
                    .await
            }
            TargetKind::Folder => {
                let query = Query::children_of(task.dest_parent.as_str())
                    .with_name(task.item.name.as_str())
                    .with_mime_type(SHORTCUT_MIME_TYPE);
                let existing = self.lister().collect_matching(query).await?;

                let present = existing.iter().any(|item| {
                    matches!(&item.kind, ItemKind::Shortcut { target_id: t, .. } if t == target_id)
                });
                if present {
                    walk.report.files_skipped += 1;
                    return Ok(());
                }

                self.store
                    .create(&NewItem::shortcut(
                        task.item.name.as_str(),
                        task.dest_parent.as_str(),
                        target_id,
                    ))
                    .await?;
                walk.report.shortcuts_created += 1;
                Ok(())
            }
        }
    }

    async fn move_item(&self, walk: &mut Walk, task: &SyncTask) -> Result<()> {
        self.store
            .update(
                &task.item.id,
                &[task.dest_parent.clone()],
                &[task.source_parent.clone()],
            )
            .await?;
        debug!("Moved '{}'", task.path);
        walk.report.files_moved += 1;
        Ok(())
    }
}
