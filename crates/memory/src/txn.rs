//! The in-memory transaction. Reads run against a shared read guard;
//! writes run against a staged copy of the tables that replaces the shared
//! state at commit, which makes rollback a plain drop.

use crate::find;
use crate::tables::Tables;
use archive_core::contract::BackendTransaction;
use archive_core::{
    ChangeKind, ChangeRecord, ContentType, CreatedInstance, DeletionReport, Error,
    ExportedRecord, FileInfo, FindRequest, FindResource, GlobalProperty,
    GlobalStatistics, MetadataType, QueueOrigin, ResourceId, ResourceLevel, Result,
    TagSet,
};
use chrono::{DateTime, Utc};
use parking_lot::{MutexGuard, RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

pub(crate) enum Mode<'a> {
    Read(RwLockReadGuard<'a, Tables>),
    Write {
        // Held for the whole transaction: writers are serialized.
        _writer: MutexGuard<'a, ()>,
        shared: &'a RwLock<Tables>,
        staged: Tables,
    },
}

pub(crate) struct MemoryTransaction<'a> {
    mode: Mode<'a>,
}

impl<'a> MemoryTransaction<'a> {
    pub(crate) fn new(mode: Mode<'a>) -> MemoryTransaction<'a> {
        MemoryTransaction { mode }
    }

    fn tables(&self) -> &Tables {
        match &self.mode {
            Mode::Read(guard) => guard,
            Mode::Write { staged, .. } => staged,
        }
    }

    fn tables_mut(&mut self) -> Result<&mut Tables> {
        match &mut self.mode {
            Mode::Read(_) => Err(Error::BadSequenceOfCalls(
                "mutation inside a read-only transaction".into(),
            )),
            Mode::Write { staged, .. } => Ok(staged),
        }
    }

    fn find_or_create(
        &mut self,
        level: ResourceLevel,
        public_id: &str,
        parent: Option<ResourceId>,
    ) -> Result<(ResourceId, bool)> {
        let tables = self.tables_mut()?;
        match tables.resolve(public_id) {
            Some((id, found)) if found == level => Ok((id, false)),
            Some(_) => Err(Error::DuplicateResource(format!(
                "identifier {public_id} already maps to another level"
            ))),
            None => Ok((tables.create_row(level, public_id, parent), true)),
        }
    }
}

impl BackendTransaction for MemoryTransaction<'_> {
    fn commit(&mut self, _compressed_size_delta: i64) -> Result<()> {
        // Totals are recomputed from the rows, the delta is not needed.
        match &mut self.mode {
            Mode::Read(_) => Ok(()),
            Mode::Write { shared, staged, .. } => {
                *shared.write() = std::mem::take(staged);
                Ok(())
            }
        }
    }

    fn rollback(&mut self) -> Result<()> {
        // The staged copy is simply discarded.
        Ok(())
    }

    // -- resources ----------------------------------------------------------

    fn lookup_resource(&self, public_id: &str) -> Result<Option<(ResourceId, ResourceLevel)>> {
        Ok(self.tables().resolve(public_id))
    }

    fn get_public_id(&self, id: ResourceId) -> Result<String> {
        Ok(self.tables().row(id)?.public_id.clone())
    }

    fn get_resource_level(&self, id: ResourceId) -> Result<ResourceLevel> {
        Ok(self.tables().row(id)?.level)
    }

    fn lookup_parent(&self, id: ResourceId) -> Result<Option<ResourceId>> {
        Ok(self.tables().row(id)?.parent.map(ResourceId))
    }

    fn get_children(&self, id: ResourceId) -> Result<Vec<ResourceId>> {
        Ok(self
            .tables()
            .row(id)?
            .children
            .iter()
            .copied()
            .map(ResourceId)
            .collect())
    }

    fn get_children_public_ids(&self, id: ResourceId) -> Result<Vec<String>> {
        let tables = self.tables();
        tables
            .row(id)?
            .children
            .iter()
            .map(|&child| Ok(tables.row(ResourceId(child))?.public_id.clone()))
            .collect()
    }

    fn get_all_public_ids(&self, level: ResourceLevel) -> Result<Vec<String>> {
        Ok(self
            .tables()
            .resources
            .values()
            .filter(|row| row.level == level)
            .map(|row| row.public_id.clone())
            .collect())
    }

    fn get_all_public_ids_page(
        &self,
        level: ResourceLevel,
        since: u64,
        limit: u64,
    ) -> Result<Vec<String>> {
        let take = if limit == 0 { usize::MAX } else { limit as usize };
        Ok(self
            .tables()
            .resources
            .values()
            .filter(|row| row.level == level)
            .skip(since as usize)
            .take(take)
            .map(|row| row.public_id.clone())
            .collect())
    }

    fn count_resources(&self, level: ResourceLevel) -> Result<u64> {
        Ok(self.tables().count_level(level))
    }

    fn create_instance(
        &mut self,
        patient: &str,
        study: &str,
        series: &str,
        instance: &str,
    ) -> Result<CreatedInstance> {
        let (patient_id, is_new_patient) =
            self.find_or_create(ResourceLevel::Patient, patient, None)?;
        let (study_id, is_new_study) =
            self.find_or_create(ResourceLevel::Study, study, Some(patient_id))?;
        let (series_id, is_new_series) =
            self.find_or_create(ResourceLevel::Series, series, Some(study_id))?;
        let (instance_id, is_new_instance) =
            self.find_or_create(ResourceLevel::Instance, instance, Some(series_id))?;

        // Receiving content makes the patient the most recently used one.
        self.tables_mut()?.touch_patient(patient_id);

        Ok(CreatedInstance {
            instance: instance_id,
            is_new_instance,
            series: series_id,
            is_new_series,
            study: study_id,
            is_new_study,
            patient: patient_id,
            is_new_patient,
        })
    }

    fn delete_resource(&mut self, id: ResourceId) -> Result<DeletionReport> {
        self.tables_mut()?.delete_subtree(id)
    }

    // -- main tags ----------------------------------------------------------

    fn get_main_tags(&self, id: ResourceId) -> Result<TagSet> {
        Ok(self.tables().row(id)?.main_tags.clone())
    }

    fn set_main_tags(&mut self, id: ResourceId, tags: &TagSet) -> Result<()> {
        self.tables_mut()?.row_mut(id)?.main_tags = tags.clone();
        Ok(())
    }

    fn clear_main_tags(&mut self, id: ResourceId) -> Result<()> {
        self.tables_mut()?.row_mut(id)?.main_tags = TagSet::new();
        Ok(())
    }

    // -- metadata -----------------------------------------------------------

    fn lookup_metadata(
        &self,
        id: ResourceId,
        kind: MetadataType,
    ) -> Result<Option<(String, i64)>> {
        Ok(self.tables().row(id)?.metadata.get(&kind).cloned())
    }

    fn get_all_metadata(&self, id: ResourceId) -> Result<BTreeMap<MetadataType, (String, i64)>> {
        Ok(self.tables().row(id)?.metadata.clone())
    }

    fn get_children_metadata(&self, id: ResourceId, kind: MetadataType) -> Result<Vec<String>> {
        let tables = self.tables();
        let mut values = Vec::new();
        for &child in &tables.row(id)?.children {
            if let Some((value, _revision)) = tables.row(ResourceId(child))?.metadata.get(&kind) {
                values.push(value.clone());
            }
        }
        Ok(values)
    }

    fn set_metadata(
        &mut self,
        id: ResourceId,
        kind: MetadataType,
        value: &str,
        revision: i64,
    ) -> Result<()> {
        self.tables_mut()?
            .row_mut(id)?
            .metadata
            .insert(kind, (value.to_owned(), revision));
        Ok(())
    }

    fn delete_metadata(&mut self, id: ResourceId, kind: MetadataType) -> Result<()> {
        self.tables_mut()?.row_mut(id)?.metadata.remove(&kind);
        Ok(())
    }

    // -- attachments --------------------------------------------------------

    fn lookup_attachment(
        &self,
        id: ResourceId,
        content_type: ContentType,
    ) -> Result<Option<(FileInfo, i64)>> {
        Ok(self.tables().row(id)?.attachments.get(&content_type).cloned())
    }

    fn list_attachments(&self, id: ResourceId) -> Result<Vec<ContentType>> {
        Ok(self.tables().row(id)?.attachments.keys().copied().collect())
    }

    fn add_attachment(&mut self, id: ResourceId, info: &FileInfo, revision: i64) -> Result<()> {
        let row = self.tables_mut()?.row_mut(id)?;
        if row.attachments.contains_key(&info.content_type) {
            return Err(Error::Internal(format!(
                "attachment {} already exists on resource {}",
                info.content_type.0, id.0
            )));
        }
        row.attachments.insert(info.content_type, (info.clone(), revision));
        Ok(())
    }

    fn delete_attachment(
        &mut self,
        id: ResourceId,
        content_type: ContentType,
    ) -> Result<Option<FileInfo>> {
        Ok(self
            .tables_mut()?
            .row_mut(id)?
            .attachments
            .remove(&content_type)
            .map(|(info, _revision)| info))
    }

    fn get_attachment_custom_data(&self, uuid: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tables().custom_data.get(uuid).cloned())
    }

    fn set_attachment_custom_data(&mut self, uuid: &str, data: &[u8]) -> Result<()> {
        self.tables_mut()?
            .custom_data
            .insert(uuid.to_owned(), data.to_vec());
        Ok(())
    }

    // -- sizes & recycling --------------------------------------------------

    fn get_total_compressed_size(&self) -> Result<u64> {
        Ok(self.tables().total_compressed_size())
    }

    fn get_total_uncompressed_size(&self) -> Result<u64> {
        Ok(self.tables().total_uncompressed_size())
    }

    fn is_disk_size_above(&self, threshold: u64) -> Result<bool> {
        Ok(self.tables().total_compressed_size() > threshold)
    }

    fn select_patient_to_recycle(
        &self,
        avoid: Option<ResourceId>,
    ) -> Result<Option<ResourceId>> {
        let tables = self.tables();
        for &patient in &tables.patient_order {
            if avoid.map(|avoid| avoid.0) == Some(patient) {
                continue;
            }
            if !tables.row(ResourceId(patient))?.protected {
                return Ok(Some(ResourceId(patient)));
            }
        }
        Ok(None)
    }

    fn is_protected_patient(&self, patient: ResourceId) -> Result<bool> {
        Ok(self.tables().row(patient)?.protected)
    }

    fn set_protected_patient(&mut self, patient: ResourceId, protected: bool) -> Result<()> {
        let tables = self.tables_mut()?;
        tables.row_mut(patient)?.protected = protected;
        tables.patient_order.retain(|id| *id != patient.0);
        if !protected {
            // An unprotected patient rejoins the recycling order at the
            // most-recently-used end.
            tables.patient_order.push(patient.0);
        }
        Ok(())
    }

    fn update_and_get_statistics(&mut self) -> Result<GlobalStatistics> {
        let tables = self.tables_mut()?;
        Ok(GlobalStatistics {
            disk_size: tables.total_compressed_size(),
            uncompressed_size: tables.total_uncompressed_size(),
            patients: tables.count_level(ResourceLevel::Patient),
            studies: tables.count_level(ResourceLevel::Study),
            series: tables.count_level(ResourceLevel::Series),
            instances: tables.count_level(ResourceLevel::Instance),
        })
    }

    // -- change log ---------------------------------------------------------

    fn log_change(
        &mut self,
        kind: ChangeKind,
        level: ResourceLevel,
        public_id: &str,
        date: DateTime<Utc>,
    ) -> Result<()> {
        let tables = self.tables_mut()?;
        tables.last_change_seq += 1;
        let seq = tables.last_change_seq;
        tables.changes.push(ChangeRecord {
            seq,
            kind,
            level,
            public_id: public_id.to_owned(),
            date,
        });
        Ok(())
    }

    fn get_changes(&self, since: i64, limit: u32) -> Result<(Vec<ChangeRecord>, bool)> {
        let matching: Vec<&ChangeRecord> = self
            .tables()
            .changes
            .iter()
            .filter(|change| change.seq > since)
            .collect();
        let done = matching.len() <= limit as usize;
        let items = matching
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((items, done))
    }

    fn get_changes_extended(
        &self,
        since: i64,
        to: i64,
        limit: u32,
        filter: &[ChangeKind],
    ) -> Result<(Vec<ChangeRecord>, bool)> {
        let matching: Vec<&ChangeRecord> = self
            .tables()
            .changes
            .iter()
            .filter(|change| {
                change.seq > since
                    && change.seq <= to
                    && (filter.is_empty() || filter.contains(&change.kind))
            })
            .collect();
        let done = matching.len() <= limit as usize;
        let items = matching
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((items, done))
    }

    fn get_last_change(&self) -> Result<Option<ChangeRecord>> {
        Ok(self.tables().changes.last().cloned())
    }

    fn get_last_change_index(&self) -> Result<i64> {
        Ok(self.tables().last_change_seq)
    }

    fn delete_changes(&mut self) -> Result<()> {
        // The high-water mark survives the purge.
        self.tables_mut()?.changes.clear();
        Ok(())
    }

    // -- export log ---------------------------------------------------------

    fn log_exported_resource(&mut self, record: &ExportedRecord) -> Result<()> {
        let tables = self.tables_mut()?;
        tables.last_export_seq += 1;
        let mut record = record.clone();
        record.seq = tables.last_export_seq;
        tables.exports.push(record);
        Ok(())
    }

    fn get_exported_resources(
        &self,
        since: i64,
        limit: u32,
    ) -> Result<(Vec<ExportedRecord>, bool)> {
        let matching: Vec<&ExportedRecord> = self
            .tables()
            .exports
            .iter()
            .filter(|record| record.seq > since)
            .collect();
        let done = matching.len() <= limit as usize;
        let items = matching
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((items, done))
    }

    fn get_last_exported_resource(&self) -> Result<Option<ExportedRecord>> {
        Ok(self.tables().exports.last().cloned())
    }

    fn delete_exported_resources(&mut self) -> Result<()> {
        self.tables_mut()?.exports.clear();
        Ok(())
    }

    // -- global properties --------------------------------------------------

    fn lookup_global_property(
        &self,
        property: GlobalProperty,
        shared: bool,
    ) -> Result<Option<String>> {
        Ok(self.tables().globals.get(&(property.0, shared)).cloned())
    }

    fn set_global_property(
        &mut self,
        property: GlobalProperty,
        shared: bool,
        value: &str,
    ) -> Result<()> {
        self.tables_mut()?
            .globals
            .insert((property.0, shared), value.to_owned());
        Ok(())
    }

    fn increment_global_property(
        &mut self,
        property: GlobalProperty,
        shared: bool,
        increment: i64,
    ) -> Result<i64> {
        let tables = self.tables_mut()?;
        let entry = tables.globals.entry((property.0, shared)).or_default();
        let value = entry.parse::<i64>().unwrap_or(0) + increment;
        *entry = value.to_string();
        Ok(value)
    }

    // -- labels -------------------------------------------------------------

    fn add_label(&mut self, id: ResourceId, label: &str) -> Result<()> {
        self.tables_mut()?.row_mut(id)?.labels.insert(label.to_owned());
        Ok(())
    }

    fn remove_label(&mut self, id: ResourceId, label: &str) -> Result<()> {
        self.tables_mut()?.row_mut(id)?.labels.remove(label);
        Ok(())
    }

    fn list_labels(&self, id: ResourceId) -> Result<BTreeSet<String>> {
        Ok(self.tables().row(id)?.labels.clone())
    }

    fn list_all_labels(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .tables()
            .resources
            .values()
            .flat_map(|row| row.labels.iter().cloned())
            .collect())
    }

    // -- find ---------------------------------------------------------------

    fn execute_find(&self, request: &FindRequest) -> Result<Vec<FindResource>> {
        let tables = self.tables();
        find::matching_ids(tables, request)?
            .into_iter()
            .map(|id| find::hydrate(tables, id, request))
            .collect()
    }

    fn execute_count(&self, request: &FindRequest) -> Result<u64> {
        find::count_matches(self.tables(), request)
    }

    fn find_identifiers(&self, request: &FindRequest) -> Result<Vec<String>> {
        let tables = self.tables();
        find::matching_ids(tables, request)?
            .into_iter()
            .map(|id| Ok(tables.row(id)?.public_id.clone()))
            .collect()
    }

    fn expand_resource(
        &self,
        public_id: &str,
        request: &FindRequest,
    ) -> Result<Option<FindResource>> {
        find::expand(self.tables(), public_id, request)
    }

    // -- key-value stores & queues ------------------------------------------

    fn kv_store(&mut self, store_id: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.tables_mut()?
            .kv
            .entry(store_id.to_owned())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn kv_get(&self, store_id: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tables()
            .kv
            .get(store_id)
            .and_then(|store| store.get(key).cloned()))
    }

    fn kv_delete(&mut self, store_id: &str, key: &[u8]) -> Result<()> {
        if let Some(store) = self.tables_mut()?.kv.get_mut(store_id) {
            store.remove(key);
        }
        Ok(())
    }

    fn kv_list(
        &self,
        store_id: &str,
        from: Option<&[u8]>,
        limit: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let take = if limit == 0 { usize::MAX } else { limit as usize };
        let Some(store) = self.tables().kv.get(store_id) else {
            return Ok(Vec::new());
        };
        let lower = match from {
            Some(from) => Bound::Excluded(from.to_vec()),
            None => Bound::Unbounded,
        };
        Ok(store
            .range((lower, Bound::Unbounded))
            .take(take)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn queue_enqueue(&mut self, queue_id: &str, value: &[u8]) -> Result<()> {
        self.tables_mut()?
            .queues
            .entry(queue_id.to_owned())
            .or_default()
            .push_back(value.to_vec());
        Ok(())
    }

    fn queue_dequeue(&mut self, queue_id: &str, origin: QueueOrigin) -> Result<Option<Vec<u8>>> {
        let Some(queue) = self.tables_mut()?.queues.get_mut(queue_id) else {
            return Ok(None);
        };
        Ok(match origin {
            QueueOrigin::Front => queue.pop_front(),
            QueueOrigin::Back => queue.pop_back(),
        })
    }

    fn queue_size(&self, queue_id: &str) -> Result<u64> {
        Ok(self
            .tables()
            .queues
            .get(queue_id)
            .map(|queue| queue.len() as u64)
            .unwrap_or(0))
    }
}
