//! Transaction wrapper and typed views.
//!
//! [`Transaction`] binds a backend transaction handle to its per-attempt
//! context and guarantees rollback unless `commit` was reached. The typed
//! views restrict which primitives an operation can touch:
//! [`ReadTransaction`] exposes the read side, [`WriteTransaction`] layers
//! the mutations on top and routes their side effects through the context.

use crate::context::TransactionContext;
use archive_core::{
    contract::BackendTransaction, ChangeKind, ChangeRecord, Error, ExportedRecord,
    FileInfo, Result, SeriesStatus, TagSet, TransactionKind,
};
use archive_core::{
    ContentType, CreatedInstance, FindRequest, FindResource, GlobalProperty,
    GlobalStatistics, MetadataType, QueueOrigin, ResourceId, ResourceLevel,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, trace};

/// Terminal state of a transaction, checked at drop time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Committed,
    RolledBack,
}

/// One attempt of the retry engine: a backend transaction plus its context.
///
/// Dropping a still-pending transaction rolls it back; a rollback failure
/// is logged and swallowed at that single point, never propagated through
/// unwinding.
pub struct Transaction<'a> {
    backend: Box<dyn BackendTransaction + 'a>,
    context: Box<dyn TransactionContext>,
    kind: TransactionKind,
    state: TransactionState,
}

impl<'a> Transaction<'a> {
    pub fn new(
        backend: Box<dyn BackendTransaction + 'a>,
        context: Box<dyn TransactionContext>,
        kind: TransactionKind,
    ) -> Transaction<'a> {
        Transaction {
            backend,
            context,
            kind,
            state: TransactionState::Pending,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn read_view(&self) -> ReadTransaction<'_> {
        ReadTransaction {
            backend: &*self.backend,
        }
    }

    pub fn write_view(&mut self) -> WriteTransaction<'_, 'a> {
        WriteTransaction {
            backend: self.backend.as_mut(),
            context: self.context.as_mut(),
        }
    }

    /// Commits the backend transaction (folding in the compressed-size
    /// delta), then the context. Committing twice is a contract error.
    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Pending => {
                let delta = self.context.compressed_size_delta();
                self.backend.commit(delta)?;
                self.state = TransactionState::Committed;
                self.context.commit();
                Ok(())
            }
            _ => Err(Error::BadSequenceOfCalls(
                "commit on a terminated transaction".into(),
            )),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Pending {
            self.state = TransactionState::RolledBack;
            if let Err(err) = self.backend.rollback() {
                // The only place an error is swallowed: unwinding must not
                // be interrupted by a failing rollback.
                error!("cannot rollback transaction: {err}");
            }
        }
    }
}

/// Read-only facade over the backend primitives.
pub struct ReadTransaction<'t> {
    backend: &'t dyn BackendTransaction,
}

impl<'t> ReadTransaction<'t> {
    pub fn new(backend: &'t dyn BackendTransaction) -> ReadTransaction<'t> {
        ReadTransaction { backend }
    }

    // -- resources --------------------------------------------------------

    pub fn lookup_resource(&self, public_id: &str) -> Result<Option<(ResourceId, ResourceLevel)>> {
        self.backend.lookup_resource(public_id)
    }

    pub fn get_public_id(&self, id: ResourceId) -> Result<String> {
        self.backend.get_public_id(id)
    }

    pub fn get_resource_level(&self, id: ResourceId) -> Result<ResourceLevel> {
        self.backend.get_resource_level(id)
    }

    pub fn lookup_parent(&self, id: ResourceId) -> Result<Option<ResourceId>> {
        self.backend.lookup_parent(id)
    }

    pub fn get_children(&self, id: ResourceId) -> Result<Vec<ResourceId>> {
        self.backend.get_children(id)
    }

    pub fn get_children_public_ids(&self, id: ResourceId) -> Result<Vec<String>> {
        self.backend.get_children_public_ids(id)
    }

    pub fn get_all_public_ids(&self, level: ResourceLevel) -> Result<Vec<String>> {
        self.backend.get_all_public_ids(level)
    }

    pub fn get_all_public_ids_page(
        &self,
        level: ResourceLevel,
        since: u64,
        limit: u64,
    ) -> Result<Vec<String>> {
        self.backend.get_all_public_ids_page(level, since, limit)
    }

    pub fn count_resources(&self, level: ResourceLevel) -> Result<u64> {
        self.backend.count_resources(level)
    }

    pub fn get_main_tags(&self, id: ResourceId) -> Result<TagSet> {
        self.backend.get_main_tags(id)
    }

    // -- metadata & attachments -------------------------------------------

    pub fn lookup_metadata(
        &self,
        id: ResourceId,
        kind: MetadataType,
    ) -> Result<Option<(String, i64)>> {
        self.backend.lookup_metadata(id, kind)
    }

    pub fn get_all_metadata(
        &self,
        id: ResourceId,
    ) -> Result<BTreeMap<MetadataType, (String, i64)>> {
        self.backend.get_all_metadata(id)
    }

    pub fn get_children_metadata(
        &self,
        id: ResourceId,
        kind: MetadataType,
    ) -> Result<Vec<String>> {
        self.backend.get_children_metadata(id, kind)
    }

    pub fn lookup_attachment(
        &self,
        id: ResourceId,
        content_type: ContentType,
    ) -> Result<Option<(FileInfo, i64)>> {
        self.backend.lookup_attachment(id, content_type)
    }

    pub fn list_attachments(&self, id: ResourceId) -> Result<Vec<ContentType>> {
        self.backend.list_attachments(id)
    }

    pub fn get_attachment_custom_data(&self, uuid: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get_attachment_custom_data(uuid)
    }

    // -- sizes & statistics -----------------------------------------------

    pub fn get_total_compressed_size(&self) -> Result<u64> {
        self.backend.get_total_compressed_size()
    }

    pub fn get_total_uncompressed_size(&self) -> Result<u64> {
        self.backend.get_total_uncompressed_size()
    }

    pub fn is_disk_size_above(&self, threshold: u64) -> Result<bool> {
        self.backend.is_disk_size_above(threshold)
    }

    pub fn is_protected_patient(&self, patient: ResourceId) -> Result<bool> {
        self.backend.is_protected_patient(patient)
    }

    // -- logs -------------------------------------------------------------

    pub fn get_changes(&self, since: i64, limit: u32) -> Result<(Vec<ChangeRecord>, bool)> {
        self.backend.get_changes(since, limit)
    }

    pub fn get_changes_extended(
        &self,
        since: i64,
        to: i64,
        limit: u32,
        filter: &[ChangeKind],
    ) -> Result<(Vec<ChangeRecord>, bool)> {
        self.backend.get_changes_extended(since, to, limit, filter)
    }

    pub fn get_last_change(&self) -> Result<Option<ChangeRecord>> {
        self.backend.get_last_change()
    }

    pub fn get_last_change_index(&self) -> Result<i64> {
        self.backend.get_last_change_index()
    }

    pub fn get_exported_resources(
        &self,
        since: i64,
        limit: u32,
    ) -> Result<(Vec<ExportedRecord>, bool)> {
        self.backend.get_exported_resources(since, limit)
    }

    pub fn get_last_exported_resource(&self) -> Result<Option<ExportedRecord>> {
        self.backend.get_last_exported_resource()
    }

    // -- properties, labels, primitives -----------------------------------

    pub fn lookup_global_property(
        &self,
        property: GlobalProperty,
        shared: bool,
    ) -> Result<Option<String>> {
        self.backend.lookup_global_property(property, shared)
    }

    pub fn list_labels(&self, id: ResourceId) -> Result<BTreeSet<String>> {
        self.backend.list_labels(id)
    }

    pub fn list_all_labels(&self) -> Result<BTreeSet<String>> {
        self.backend.list_all_labels()
    }

    pub fn kv_get(&self, store_id: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.kv_get(store_id, key)
    }

    pub fn kv_list(
        &self,
        store_id: &str,
        from: Option<&[u8]>,
        limit: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.backend.kv_list(store_id, from, limit)
    }

    pub fn queue_size(&self, queue_id: &str) -> Result<u64> {
        self.backend.queue_size(queue_id)
    }

    // -- find -------------------------------------------------------------

    pub fn execute_find(&self, request: &FindRequest) -> Result<Vec<FindResource>> {
        self.backend.execute_find(request)
    }

    pub fn execute_count(&self, request: &FindRequest) -> Result<u64> {
        self.backend.execute_count(request)
    }

    pub fn find_identifiers(&self, request: &FindRequest) -> Result<Vec<String>> {
        self.backend.find_identifiers(request)
    }

    pub fn expand_resource(
        &self,
        public_id: &str,
        request: &FindRequest,
    ) -> Result<Option<FindResource>> {
        self.backend.expand_resource(public_id, request)
    }

    // -- derived ----------------------------------------------------------

    /// Completeness of a series against an expected instance count, from
    /// the index-in-series metadata of its children.
    pub fn series_status(&self, series: ResourceId, expected: i64) -> Result<SeriesStatus> {
        let values = self.get_children_metadata(series, MetadataType::INDEX_IN_SERIES)?;

        let mut seen = BTreeSet::new();
        for value in values {
            let index: i64 = match value.trim().parse() {
                Ok(index) => index,
                Err(_) => return Ok(SeriesStatus::Unknown),
            };
            if index <= 0 || index > expected {
                // Out-of-range instance index
                return Ok(SeriesStatus::Inconsistent);
            }
            if !seen.insert(index) {
                // Twice the same instance index
                return Ok(SeriesStatus::Inconsistent);
            }
        }

        if seen.len() as i64 == expected {
            Ok(SeriesStatus::Complete)
        } else {
            Ok(SeriesStatus::Missing)
        }
    }

    /// Whether admitting `added_bytes` more would exceed the size ceiling.
    /// An instance larger than the whole ceiling fails fast: no amount of
    /// eviction can make room for it.
    pub fn has_reached_max_storage_size(
        &self,
        max_storage_bytes: u64,
        added_bytes: u64,
    ) -> Result<bool> {
        if max_storage_bytes == 0 {
            return Ok(false);
        }
        if max_storage_bytes < added_bytes {
            return Err(Error::StorageFull(format!(
                "cannot store an instance of {added_bytes} bytes in a storage area limited to {max_storage_bytes} bytes"
            )));
        }
        self.is_disk_size_above(max_storage_bytes - added_bytes)
    }

    /// Whether the patient-count ceiling is exceeded. Called after the new
    /// patient was created inside this very transaction, hence the strict
    /// comparison.
    pub fn has_reached_max_patient_count(&self, max_patient_count: u64) -> Result<bool> {
        if max_patient_count == 0 {
            return Ok(false);
        }
        let patients = self.count_resources(ResourceLevel::Patient)?;
        Ok(patients > max_patient_count)
    }
}

/// Read-write facade: the read side plus mutations, with side effects
/// routed through the transaction context.
pub struct WriteTransaction<'t, 'a> {
    backend: &'t mut (dyn BackendTransaction + 'a),
    context: &'t mut dyn TransactionContext,
}

impl<'t, 'a> WriteTransaction<'t, 'a> {
    pub fn as_read(&self) -> ReadTransaction<'_> {
        ReadTransaction {
            backend: &*self.backend,
        }
    }

    pub fn context(&mut self) -> &mut dyn TransactionContext {
        self.context
    }

    // -- resources --------------------------------------------------------

    pub fn create_instance(
        &mut self,
        patient: &str,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<CreatedInstance> {
        self.backend.create_instance(patient, study, series, instance)
    }

    /// Deletes a whole subtree. Persists a `Deleted` change for every
    /// removed resource (bottom-up) and folds the report into the context
    /// so blob removal happens after commit.
    pub fn delete_resource(&mut self, id: ResourceId) -> Result<()> {
        let report = self.backend.delete_resource(id)?;
        let now = Utc::now();
        for (level, public_id) in &report.resources {
            self.backend
                .log_change(ChangeKind::Deleted, *level, public_id, now)?;
        }
        self.context.on_deletion(&report);
        Ok(())
    }

    pub fn set_main_tags(&mut self, id: ResourceId, tags: &TagSet) -> Result<()> {
        self.backend.set_main_tags(id, tags)
    }

    pub fn clear_main_tags(&mut self, id: ResourceId) -> Result<()> {
        self.backend.clear_main_tags(id)
    }

    // -- metadata & attachments -------------------------------------------

    pub fn set_metadata(
        &mut self,
        id: ResourceId,
        kind: MetadataType,
        value: &str,
        revision: i64,
    ) -> Result<()> {
        self.backend.set_metadata(id, kind, value, revision)
    }

    pub fn delete_metadata(&mut self, id: ResourceId, kind: MetadataType) -> Result<()> {
        self.backend.delete_metadata(id, kind)
    }

    /// Adds an attachment and accounts its bytes in the context.
    pub fn add_attachment(
        &mut self,
        id: ResourceId,
        info: &FileInfo,
        revision: i64,
    ) -> Result<()> {
        self.backend.add_attachment(id, info, revision)?;
        self.context.signal_attachments_added(info.compressed_size);
        Ok(())
    }

    /// Removes an attachment; its blob is scheduled for removal at commit.
    pub fn delete_attachment(&mut self, id: ResourceId, content_type: ContentType) -> Result<()> {
        if let Some(file) = self.backend.delete_attachment(id, content_type)? {
            self.context.signal_file_deleted(file);
        }
        Ok(())
    }

    pub fn set_attachment_custom_data(&mut self, uuid: &str, data: &[u8]) -> Result<()> {
        self.backend.set_attachment_custom_data(uuid, data)
    }

    // -- logs, properties, labels -----------------------------------------

    /// Persists a change entry and signals it to the context.
    pub fn log_change(
        &mut self,
        kind: ChangeKind,
        level: ResourceLevel,
        public_id: &str,
    ) -> Result<()> {
        let date = Utc::now();
        self.backend.log_change(kind, level, public_id, date)?;
        self.context.signal_change(ChangeRecord {
            seq: 0,
            kind,
            level,
            public_id: public_id.to_owned(),
            date,
        });
        Ok(())
    }

    pub fn log_exported_resource(&mut self, record: &ExportedRecord) -> Result<()> {
        self.backend.log_exported_resource(record)
    }

    pub fn delete_changes(&mut self) -> Result<()> {
        self.backend.delete_changes()
    }

    pub fn delete_exported_resources(&mut self) -> Result<()> {
        self.backend.delete_exported_resources()
    }

    pub fn set_global_property(
        &mut self,
        property: GlobalProperty,
        shared: bool,
        value: &str,
    ) -> Result<()> {
        self.backend.set_global_property(property, shared, value)
    }

    pub fn increment_global_property(
        &mut self,
        property: GlobalProperty,
        shared: bool,
        increment: i64,
    ) -> Result<i64> {
        self.backend.increment_global_property(property, shared, increment)
    }

    pub fn set_protected_patient(&mut self, patient: ResourceId, protected: bool) -> Result<()> {
        self.backend.set_protected_patient(patient, protected)
    }

    pub fn update_and_get_statistics(&mut self) -> Result<GlobalStatistics> {
        self.backend.update_and_get_statistics()
    }

    pub fn add_label(&mut self, id: ResourceId, label: &str) -> Result<()> {
        self.backend.add_label(id, label)
    }

    pub fn remove_label(&mut self, id: ResourceId, label: &str) -> Result<()> {
        self.backend.remove_label(id, label)
    }

    pub fn kv_store(&mut self, store_id: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.backend.kv_store(store_id, key, value)
    }

    pub fn kv_delete(&mut self, store_id: &str, key: &[u8]) -> Result<()> {
        self.backend.kv_delete(store_id, key)
    }

    pub fn queue_enqueue(&mut self, queue_id: &str, value: &[u8]) -> Result<()> {
        self.backend.queue_enqueue(queue_id, value)
    }

    pub fn queue_dequeue(&mut self, queue_id: &str, origin: QueueOrigin) -> Result<Option<Vec<u8>>> {
        self.backend.queue_dequeue(queue_id, origin)
    }

    // -- recycling --------------------------------------------------------

    fn is_recycling_needed(
        &self,
        max_storage_bytes: u64,
        max_patient_count: u64,
        added_bytes: u64,
    ) -> Result<bool> {
        let read = self.as_read();
        Ok(read.has_reached_max_storage_size(max_storage_bytes, added_bytes)?
            || read.has_reached_max_patient_count(max_patient_count)?)
    }

    /// Evicts least-recently-used patients until the pending admission
    /// fits, never touching `protected_patient` (the patient the current
    /// write belongs to). A limit of 0 disables its dimension.
    pub fn recycle(
        &mut self,
        max_storage_bytes: u64,
        max_patient_count: u64,
        added_bytes: u64,
        protected_patient: Option<&str>,
    ) -> Result<()> {
        if !self.is_recycling_needed(max_storage_bytes, max_patient_count, added_bytes)? {
            return Ok(());
        }

        // Other instances of this patient may already be in the store; they
        // must not be recycled by their own insert.
        let avoid = match protected_patient {
            None => None,
            Some(public_id) => match self.as_read().lookup_resource(public_id)? {
                None => None,
                Some((id, ResourceLevel::Patient)) => Some(id),
                Some(_) => {
                    return Err(Error::Internal(format!(
                        "protected resource {public_id} is not a patient"
                    )))
                }
            },
        };

        loop {
            let victim = match self.backend.select_patient_to_recycle(avoid)? {
                Some(victim) => victim,
                None => return Err(Error::StorageFull("cannot recycle more patients".into())),
            };

            trace!("recycling one patient");
            self.delete_resource(victim)?;

            if !self.is_recycling_needed(max_storage_bytes, max_patient_count, added_bytes)? {
                return Ok(());
            }
        }
    }
}
