//! Change-log and export-log operations.

use crate::index::Index;
use archive_core::{
    tags, Backend, ChangeKind, ChangeRecord, Error, ExportedRecord, LogPage,
    ResourceLevel, Result,
};
use chrono::Utc;

fn change_page(
    items: Vec<ChangeRecord>,
    done: bool,
    fallback_last: impl FnOnce() -> Result<i64>,
) -> Result<LogPage<ChangeRecord>> {
    let first = items.first().map(|change| change.seq);
    let last = match items.last() {
        Some(change) => change.seq,
        None => fallback_last()?,
    };
    Ok(LogPage {
        items,
        done,
        first,
        last,
    })
}

impl<B: Backend> Index<B> {
    /// Up to `limit` changes strictly after `since`. On an empty page,
    /// `last` reports the log's high-water mark so pollers keep advancing
    /// even across purged entries.
    pub fn get_changes(&self, since: i64, limit: u32) -> Result<LogPage<ChangeRecord>> {
        self.apply_read(|tx| {
            let (items, done) = tx.get_changes(since, limit)?;
            change_page(items, done, || tx.get_last_change_index())
        })
    }

    /// Range-and-filter read of the change log. Backends without the
    /// extended form get the filtering emulated on top of plain pages.
    pub fn get_changes_extended(
        &self,
        since: i64,
        to: i64,
        limit: u32,
        filter: &[ChangeKind],
    ) -> Result<LogPage<ChangeRecord>> {
        if self.capabilities().extended_changes {
            self.apply_read(|tx| {
                let (items, done) = tx.get_changes_extended(since, to, limit, filter)?;
                change_page(items, done, || tx.get_last_change_index())
            })
        } else {
            self.apply_read(|tx| {
                let mut items = Vec::new();
                let mut cursor = since;
                let mut done = true;

                loop {
                    let (page, exhausted) = tx.get_changes(cursor, limit)?;
                    if page.is_empty() {
                        break;
                    }
                    for change in page {
                        cursor = change.seq;
                        if change.seq > to {
                            break;
                        }
                        if filter.is_empty() || filter.contains(&change.kind) {
                            items.push(change);
                        }
                        if items.len() as u32 == limit {
                            break;
                        }
                    }
                    if items.len() as u32 == limit {
                        // Sequences are strictly increasing, so reaching
                        // `to` consumes the range even when the log goes on.
                        done = exhausted || cursor >= to;
                        break;
                    }
                    if cursor >= to || exhausted {
                        break;
                    }
                }

                change_page(items, done, || tx.get_last_change_index())
            })
        }
    }

    pub fn get_last_change(&self) -> Result<LogPage<ChangeRecord>> {
        self.apply_read(|tx| {
            let items: Vec<ChangeRecord> = tx.get_last_change()?.into_iter().collect();
            change_page(items, true, || tx.get_last_change_index())
        })
    }

    pub fn delete_changes(&self) -> Result<()> {
        self.apply_write(|tx| tx.delete_changes())
    }

    /// Records a change against an existing resource, checking that the
    /// resource still exists under the same internal id. A vanished
    /// resource is silently skipped (stability monitors race deletions);
    /// the same public id reappearing at another level is a consistency
    /// error.
    pub fn log_change(
        &self,
        internal_id: archive_core::ResourceId,
        kind: ChangeKind,
        level: ResourceLevel,
        public_id: &str,
    ) -> Result<()> {
        self.apply_write(|tx| match tx.as_read().lookup_resource(public_id)? {
            Some((id, found)) if id == internal_id => {
                if found == level {
                    tx.log_change(kind, level, public_id)
                } else {
                    Err(Error::UnknownResource(public_id.to_owned()))
                }
            }
            _ => Ok(()),
        })
    }

    // -- export log ---------------------------------------------------------

    /// Records that a resource was sent to a remote modality, resolving the
    /// DICOM identifiers of its hierarchy by walking up to the patient.
    pub fn log_exported_resource(&self, public_id: &str, remote_modality: &str) -> Result<()> {
        self.apply_write(|tx| {
            let (id, level) = tx
                .as_read()
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;

            let mut patient_id = String::new();
            let mut study_instance_uid = String::new();
            let mut series_instance_uid = String::new();
            let mut sop_instance_uid = String::new();

            let mut current = id;
            let mut current_level = level;
            loop {
                let main_tags = tx.as_read().get_main_tags(current)?;
                let (target, tag) = match current_level {
                    ResourceLevel::Patient => (&mut patient_id, tags::PATIENT_ID),
                    ResourceLevel::Study => (&mut study_instance_uid, tags::STUDY_INSTANCE_UID),
                    ResourceLevel::Series => (&mut series_instance_uid, tags::SERIES_INSTANCE_UID),
                    ResourceLevel::Instance => (&mut sop_instance_uid, tags::SOP_INSTANCE_UID),
                };
                if let Some(value) = main_tags.get(tag) {
                    *target = value.to_owned();
                }

                match current_level.parent() {
                    Some(parent_level) => {
                        current = tx.as_read().lookup_parent(current)?.ok_or_else(|| {
                            Error::Internal(format!("resource {public_id} has a broken hierarchy"))
                        })?;
                        current_level = parent_level;
                    }
                    None => break,
                }
            }

            tx.log_exported_resource(&ExportedRecord {
                seq: 0,
                level,
                public_id: public_id.to_owned(),
                remote_modality: remote_modality.to_owned(),
                date: Utc::now(),
                patient_id,
                study_instance_uid,
                series_instance_uid,
                sop_instance_uid,
            })
        })
    }

    /// Up to `limit` export entries strictly after `since`. On an empty
    /// page, `last` falls back to the caller's cursor.
    pub fn get_exported_resources(
        &self,
        since: i64,
        limit: u32,
    ) -> Result<LogPage<ExportedRecord>> {
        self.apply_read(|tx| {
            let (items, done) = tx.get_exported_resources(since, limit)?;
            let first = items.first().map(|record| record.seq);
            let last = items.last().map(|record| record.seq).unwrap_or(since);
            Ok(LogPage {
                items,
                done,
                first,
                last,
            })
        })
    }

    pub fn get_last_exported_resource(&self) -> Result<Option<ExportedRecord>> {
        self.apply_read(|tx| tx.get_last_exported_resource())
    }

    pub fn delete_exported_resources(&self) -> Result<()> {
        self.apply_write(|tx| tx.delete_exported_resources())
    }
}
