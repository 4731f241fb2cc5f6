//! The storage backend contract.
//!
//! Any SQL or embedded engine is driven through these two traits. The
//! orchestration layer in `archive-engine` is generic over "anything
//! implementing [`Backend`]" and never assumes a concrete store.
//!
//! All primitives run inside one backend transaction and report through the
//! canonical error type; a backend under concurrent writers signals
//! write/write conflicts with `Error::CannotSerialize`, which is the only
//! error class the engine will retry.

use crate::attachment::{ContentType, FileInfo};
use crate::changes::{ChangeKind, ChangeRecord, ExportedRecord};
use crate::error::Result;
use crate::find::{FindRequest, FindResource};
use crate::metadata::MetadataType;
use crate::tags::TagSet;
use crate::types::{
    GlobalProperty, GlobalStatistics, QueueOrigin, RemainingAncestor, ResourceId,
    ResourceLevel, TransactionKind,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Static feature flags advertised by a backend. Read once at engine
/// construction; a backend must not change its answers at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flush_to_disk: bool,
    pub revisions: bool,
    pub labels: bool,
    pub atomic_increment: bool,
    pub update_and_get_statistics: bool,
    /// Filtering and hydration in a single call (vs. two-phase find+expand).
    pub integrated_find: bool,
    /// Range-and-filter form of the change-log read.
    pub extended_changes: bool,
    pub attachment_custom_data: bool,
    pub key_value_stores: bool,
    pub queues: bool,
}

impl Capabilities {
    pub fn none() -> Capabilities {
        Capabilities::default()
    }

    pub fn all() -> Capabilities {
        Capabilities {
            flush_to_disk: true,
            revisions: true,
            labels: true,
            atomic_increment: true,
            update_and_get_statistics: true,
            integrated_find: true,
            extended_changes: true,
            attachment_custom_data: true,
            key_value_stores: true,
            queues: true,
        }
    }
}

/// Result of the atomic find-or-create of an instance with its ancestors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInstance {
    pub instance: ResourceId,
    pub is_new_instance: bool,
    pub series: ResourceId,
    pub is_new_series: bool,
    pub study: ResourceId,
    pub is_new_study: bool,
    pub patient: ResourceId,
    pub is_new_patient: bool,
}

/// Everything a cascading delete removed, reported by the backend so the
/// engine can signal deletions and schedule blob removal after commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Deleted resources, ordered bottom-up (instances first).
    pub resources: Vec<(ResourceLevel, String)>,
    /// Attachment handles whose blobs must be removed from the storage
    /// area once the transaction commits.
    pub files: Vec<FileInfo>,
    /// Ancestor closest to the patient level left without the deleted
    /// child, if the whole chain did not vanish.
    pub remaining_ancestor: Option<RemainingAncestor>,
}

/// A transactional session factory over one storage engine.
pub trait Backend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn start_transaction<'a>(
        &'a self,
        kind: TransactionKind,
    ) -> Result<Box<dyn BackendTransaction + 'a>>;

    /// Durability barrier, outside any transaction. Backends without the
    /// capability treat this as a no-op.
    fn flush_to_disk(&self) -> Result<()> {
        Ok(())
    }
}

/// One open backend transaction. Read primitives take `&self`, mutations
/// `&mut self`; a transaction opened `ReadOnly` must reject every mutation
/// with `Error::BadSequenceOfCalls`.
pub trait BackendTransaction {
    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Commits, folding in the net compressed-size delta accumulated by the
    /// transaction context (attachment bytes added minus removed).
    fn commit(&mut self, compressed_size_delta: i64) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    fn lookup_resource(&self, public_id: &str) -> Result<Option<(ResourceId, ResourceLevel)>>;

    fn get_public_id(&self, id: ResourceId) -> Result<String>;

    fn get_resource_level(&self, id: ResourceId) -> Result<ResourceLevel>;

    fn lookup_parent(&self, id: ResourceId) -> Result<Option<ResourceId>>;

    fn get_children(&self, id: ResourceId) -> Result<Vec<ResourceId>>;

    fn get_children_public_ids(&self, id: ResourceId) -> Result<Vec<String>>;

    fn get_all_public_ids(&self, level: ResourceLevel) -> Result<Vec<String>>;

    fn get_all_public_ids_page(
        &self,
        level: ResourceLevel,
        since: u64,
        limit: u64,
    ) -> Result<Vec<String>>;

    fn count_resources(&self, level: ResourceLevel) -> Result<u64>;

    /// Atomically finds or creates the instance and any missing ancestors,
    /// reporting which of the four levels are new.
    fn create_instance(
        &mut self,
        patient: &str,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<CreatedInstance>;

    /// Deletes `id` and its whole subtree.
    fn delete_resource(&mut self, id: ResourceId) -> Result<DeletionReport>;

    // ---------------------------------------------------------------------
    // Main tags
    // ---------------------------------------------------------------------

    fn get_main_tags(&self, id: ResourceId) -> Result<TagSet>;

    fn set_main_tags(&mut self, id: ResourceId, tags: &TagSet) -> Result<()>;

    fn clear_main_tags(&mut self, id: ResourceId) -> Result<()>;

    // ---------------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------------

    fn lookup_metadata(
        &self,
        id: ResourceId,
        kind: MetadataType,
    ) -> Result<Option<(String, i64)>>;

    fn get_all_metadata(&self, id: ResourceId) -> Result<BTreeMap<MetadataType, (String, i64)>>;

    /// Values of one metadata kind across every child of `id` (children
    /// lacking the entry are skipped).
    fn get_children_metadata(
        &self,
        id: ResourceId,
        kind: MetadataType,
    ) -> Result<Vec<String>>;

    fn set_metadata(
        &mut self,
        id: ResourceId,
        kind: MetadataType,
        value: &str,
        revision: i64,
    ) -> Result<()>;

    fn delete_metadata(&mut self, id: ResourceId, kind: MetadataType) -> Result<()>;

    // ---------------------------------------------------------------------
    // Attachments
    // ---------------------------------------------------------------------

    fn lookup_attachment(
        &self,
        id: ResourceId,
        content_type: ContentType,
    ) -> Result<Option<(FileInfo, i64)>>;

    fn list_attachments(&self, id: ResourceId) -> Result<Vec<ContentType>>;

    fn add_attachment(&mut self, id: ResourceId, info: &FileInfo, revision: i64) -> Result<()>;

    /// Removes the attachment, returning its handle so the caller can
    /// schedule blob removal. `None` when no such attachment exists.
    fn delete_attachment(
        &mut self,
        id: ResourceId,
        content_type: ContentType,
    ) -> Result<Option<FileInfo>>;

    fn get_attachment_custom_data(&self, uuid: &str) -> Result<Option<Vec<u8>>>;

    fn set_attachment_custom_data(&mut self, uuid: &str, data: &[u8]) -> Result<()>;

    // ---------------------------------------------------------------------
    // Sizes & recycling
    // ---------------------------------------------------------------------

    fn get_total_compressed_size(&self) -> Result<u64>;

    fn get_total_uncompressed_size(&self) -> Result<u64>;

    /// True when the total compressed size strictly exceeds `threshold`.
    fn is_disk_size_above(&self, threshold: u64) -> Result<bool>;

    /// Least-recently-used unprotected patient, excluding `avoid`.
    fn select_patient_to_recycle(
        &self,
        avoid: Option<ResourceId>,
    ) -> Result<Option<ResourceId>>;

    fn is_protected_patient(&self, patient: ResourceId) -> Result<bool>;

    fn set_protected_patient(&mut self, patient: ResourceId, protected: bool) -> Result<()>;

    /// Recomputes and returns the global statistics in one call
    /// (`update_and_get_statistics` capability).
    fn update_and_get_statistics(&mut self) -> Result<GlobalStatistics>;

    // ---------------------------------------------------------------------
    // Change log
    // ---------------------------------------------------------------------

    /// Appends a change entry; the backend assigns the sequence number.
    fn log_change(
        &mut self,
        kind: ChangeKind,
        level: ResourceLevel,
        public_id: &str,
        date: DateTime<Utc>,
    ) -> Result<()>;

    /// Up to `limit` entries with `seq > since`, plus a flag telling
    /// whether the log is exhausted beyond the page.
    fn get_changes(&self, since: i64, limit: u32) -> Result<(Vec<ChangeRecord>, bool)>;

    /// Range-and-filter form (`extended_changes` capability).
    fn get_changes_extended(
        &self,
        since: i64,
        to: i64,
        limit: u32,
        filter: &[ChangeKind],
    ) -> Result<(Vec<ChangeRecord>, bool)>;

    fn get_last_change(&self) -> Result<Option<ChangeRecord>>;

    /// High-water mark of the change sequence, even after deletions.
    fn get_last_change_index(&self) -> Result<i64>;

    fn delete_changes(&mut self) -> Result<()>;

    // ---------------------------------------------------------------------
    // Export log
    // ---------------------------------------------------------------------

    /// Appends an export entry; the backend assigns the sequence number
    /// (the record's own `seq` field is ignored).
    fn log_exported_resource(&mut self, record: &ExportedRecord) -> Result<()>;

    fn get_exported_resources(
        &self,
        since: i64,
        limit: u32,
    ) -> Result<(Vec<ExportedRecord>, bool)>;

    fn get_last_exported_resource(&self) -> Result<Option<ExportedRecord>>;

    fn delete_exported_resources(&mut self) -> Result<()>;

    // ---------------------------------------------------------------------
    // Global properties
    // ---------------------------------------------------------------------

    fn lookup_global_property(
        &self,
        property: GlobalProperty,
        shared: bool,
    ) -> Result<Option<String>>;

    fn set_global_property(
        &mut self,
        property: GlobalProperty,
        shared: bool,
        value: &str,
    ) -> Result<()>;

    /// Atomic read-increment-write (`atomic_increment` capability); returns
    /// the incremented value.
    fn increment_global_property(
        &mut self,
        property: GlobalProperty,
        shared: bool,
        increment: i64,
    ) -> Result<i64>;

    // ---------------------------------------------------------------------
    // Labels
    // ---------------------------------------------------------------------

    fn add_label(&mut self, id: ResourceId, label: &str) -> Result<()>;

    fn remove_label(&mut self, id: ResourceId, label: &str) -> Result<()>;

    fn list_labels(&self, id: ResourceId) -> Result<BTreeSet<String>>;

    fn list_all_labels(&self) -> Result<BTreeSet<String>>;

    // ---------------------------------------------------------------------
    // Find
    // ---------------------------------------------------------------------

    /// Integrated strategy: filtering and hydration in this one call.
    fn execute_find(&self, request: &FindRequest) -> Result<Vec<FindResource>>;

    fn execute_count(&self, request: &FindRequest) -> Result<u64>;

    /// Compatibility phase 1: bare matching identifiers, in request order.
    fn find_identifiers(&self, request: &FindRequest) -> Result<Vec<String>>;

    /// Compatibility phase 2: hydrates one identifier per the request's
    /// retrieve flags. `None` when the resource vanished since phase 1.
    fn expand_resource(
        &self,
        public_id: &str,
        request: &FindRequest,
    ) -> Result<Option<FindResource>>;

    // ---------------------------------------------------------------------
    // Key-value stores & queues
    // ---------------------------------------------------------------------

    fn kv_store(&mut self, store_id: &str, key: &[u8], value: &[u8]) -> Result<()>;

    fn kv_get(&self, store_id: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn kv_delete(&mut self, store_id: &str, key: &[u8]) -> Result<()>;

    /// Up to `limit` entries in ascending key order, strictly after `from`
    /// when given.
    fn kv_list(
        &self,
        store_id: &str,
        from: Option<&[u8]>,
        limit: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn queue_enqueue(&mut self, queue_id: &str, value: &[u8]) -> Result<()>;

    fn queue_dequeue(&mut self, queue_id: &str, origin: QueueOrigin) -> Result<Option<Vec<u8>>>;

    fn queue_size(&self, queue_id: &str) -> Result<u64>;
}
