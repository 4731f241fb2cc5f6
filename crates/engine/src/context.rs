//! Per-transaction context.
//!
//! A context buffers the side effects a transaction wants to publish
//! (change notifications, attachment-size accounting, blobs to remove) and
//! releases them only once the backend transaction has committed. A rolled
//! back attempt simply drops its context, so nothing leaks into the next
//! retry.
//!
//! The surrounding server usually implements [`TransactionContext`] itself
//! to bridge into its notification and storage machinery; [`BasicContext`]
//! is a complete implementation for embedded deployments and tests.

use archive_core::{
    ChangeRecord, DeletionReport, FileInfo, RemainingAncestor, ResourceLevel,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Per-attempt transaction state, created by the factory once per retry.
pub trait TransactionContext: Send {
    /// Called exactly once, after the backend transaction committed.
    /// Publishes the buffered side effects.
    fn commit(&mut self);

    /// Net compressed attachment bytes this transaction adds (added minus
    /// removed); folded into the backend commit.
    fn compressed_size_delta(&self) -> i64;

    fn signal_change(&mut self, change: ChangeRecord);

    /// Attachment bytes were attached to a resource.
    fn signal_attachments_added(&mut self, compressed_size: u64);

    /// An attachment was removed; its blob must leave the storage area
    /// once the transaction commits.
    fn signal_file_deleted(&mut self, file: FileInfo);

    /// Folds a cascading-deletion report into the context: removed blobs,
    /// and the surviving ancestor (the one closest to the patient level
    /// wins when several deletes happen in one transaction).
    fn on_deletion(&mut self, report: &DeletionReport);

    fn remaining_ancestor(&self) -> Option<RemainingAncestor>;

    /// Opens (or refreshes) the stability debounce window of a resource.
    fn mark_unstable(&mut self, level: ResourceLevel, public_id: &str);

    fn is_unstable(&self, public_id: &str) -> bool;
}

/// Creates one fresh context per retry attempt. Installed exactly once on
/// the engine before its first use.
pub trait TransactionContextFactory: Send + Sync {
    fn create(&self) -> Box<dyn TransactionContext>;
}

/// Receives the side effects a [`BasicContext`] publishes at commit time.
/// All methods default to no-ops so implementors pick what they care about.
pub trait CommitListener: Send + Sync {
    fn on_change(&self, _change: &ChangeRecord) {}

    fn on_attachments_added(&self, _compressed_size: u64) {}

    /// The blob behind `file` is no longer referenced and can be removed
    /// from the storage area.
    fn on_file_removable(&self, _file: &FileInfo) {}

    fn on_unstable(&self, _level: ResourceLevel, _public_id: &str) {}
}

struct NoopListener;

impl CommitListener for NoopListener {}

/// Buffering context: collects changes and removable blobs, publishes them
/// to a [`CommitListener`] on commit, and keeps an unstable-resource set
/// shared across the contexts of one factory.
pub struct BasicContext {
    listener: Arc<dyn CommitListener>,
    unstable: Arc<Mutex<HashSet<String>>>,
    pending_changes: Vec<ChangeRecord>,
    pending_files: Vec<FileInfo>,
    added_bytes: u64,
    removed_bytes: u64,
    remaining_ancestor: Option<RemainingAncestor>,
}

impl BasicContext {
    fn new(listener: Arc<dyn CommitListener>, unstable: Arc<Mutex<HashSet<String>>>) -> Self {
        BasicContext {
            listener,
            unstable,
            pending_changes: Vec::new(),
            pending_files: Vec::new(),
            added_bytes: 0,
            removed_bytes: 0,
            remaining_ancestor: None,
        }
    }
}

impl TransactionContext for BasicContext {
    fn commit(&mut self) {
        // Blobs first: a crash between the two loops must not leave a
        // listener acting on a change whose bytes are still pending
        // removal.
        for file in self.pending_files.drain(..) {
            self.listener.on_file_removable(&file);
        }
        for change in self.pending_changes.drain(..) {
            self.listener.on_change(&change);
        }
        if self.added_bytes > 0 {
            self.listener.on_attachments_added(self.added_bytes);
        }
    }

    fn compressed_size_delta(&self) -> i64 {
        self.added_bytes as i64 - self.removed_bytes as i64
    }

    fn signal_change(&mut self, change: ChangeRecord) {
        self.pending_changes.push(change);
    }

    fn signal_attachments_added(&mut self, compressed_size: u64) {
        self.added_bytes += compressed_size;
    }

    fn signal_file_deleted(&mut self, file: FileInfo) {
        self.removed_bytes += file.compressed_size;
        self.pending_files.push(file);
    }

    fn on_deletion(&mut self, report: &DeletionReport) {
        for file in &report.files {
            self.signal_file_deleted(file.clone());
        }
        for (level, public_id) in &report.resources {
            self.pending_changes.push(ChangeRecord {
                seq: 0,
                kind: archive_core::ChangeKind::Deleted,
                level: *level,
                public_id: public_id.clone(),
                date: Utc::now(),
            });
        }
        if let Some(ancestor) = &report.remaining_ancestor {
            let keep_new = match &self.remaining_ancestor {
                None => true,
                Some(current) => ancestor.level.depth() < current.level.depth(),
            };
            if keep_new {
                self.remaining_ancestor = Some(ancestor.clone());
            }
        }
    }

    fn remaining_ancestor(&self) -> Option<RemainingAncestor> {
        self.remaining_ancestor.clone()
    }

    fn mark_unstable(&mut self, level: ResourceLevel, public_id: &str) {
        self.unstable.lock().insert(public_id.to_owned());
        self.listener.on_unstable(level, public_id);
    }

    fn is_unstable(&self, public_id: &str) -> bool {
        self.unstable.lock().contains(public_id)
    }
}

/// Factory producing [`BasicContext`] instances that share one unstable
/// set and one listener.
pub struct BasicContextFactory {
    listener: Arc<dyn CommitListener>,
    unstable: Arc<Mutex<HashSet<String>>>,
}

impl BasicContextFactory {
    pub fn new() -> Self {
        Self::with_listener(Arc::new(NoopListener))
    }

    pub fn with_listener(listener: Arc<dyn CommitListener>) -> Self {
        BasicContextFactory {
            listener,
            unstable: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Closes the debounce window of a resource, typically from the
    /// stability monitor of the surrounding server.
    pub fn mark_stable(&self, public_id: &str) {
        self.unstable.lock().remove(public_id);
    }
}

impl Default for BasicContextFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContextFactory for BasicContextFactory {
    fn create(&self) -> Box<dyn TransactionContext> {
        Box::new(BasicContext::new(self.listener.clone(), self.unstable.clone()))
    }
}
