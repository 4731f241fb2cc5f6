//! Resource-level operations: lookups, hierarchy navigation, deletion,
//! statistics, patient protection and labels.

use crate::index::Index;
use archive_core::types::is_valid_label;
use archive_core::{
    Backend, ContentType, Error, GlobalStatistics, MetadataType, RemainingAncestor,
    ResourceId, ResourceLevel, ResourceStatistics, Result,
};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::info;

impl<B: Backend> Index<B> {
    /// Level of a resource, or `Error::UnknownResource`.
    pub fn lookup_resource_level(&self, public_id: &str) -> Result<ResourceLevel> {
        self.apply_read(|tx| match tx.lookup_resource(public_id)? {
            Some((_, level)) => Ok(level),
            None => Err(Error::UnknownResource(public_id.to_owned())),
        })
    }

    pub fn resource_exists(&self, public_id: &str) -> Result<bool> {
        self.apply_read(|tx| Ok(tx.lookup_resource(public_id)?.is_some()))
    }

    pub fn get_all_public_ids(&self, level: ResourceLevel) -> Result<Vec<String>> {
        self.apply_read(|tx| tx.get_all_public_ids(level))
    }

    pub fn get_all_public_ids_page(
        &self,
        level: ResourceLevel,
        since: u64,
        limit: u64,
    ) -> Result<Vec<String>> {
        self.apply_read(|tx| tx.get_all_public_ids_page(level, since, limit))
    }

    /// Public identifiers of the direct children of a resource.
    pub fn get_children_public_ids(&self, public_id: &str) -> Result<Vec<String>> {
        self.apply_read(|tx| {
            let (id, _level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;
            tx.get_children_public_ids(id)
        })
    }

    /// Public identifier of the direct parent; `None` on a patient.
    pub fn lookup_parent_public_id(&self, public_id: &str) -> Result<Option<String>> {
        self.apply_read(|tx| {
            let (id, _level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;
            match tx.lookup_parent(id)? {
                Some(parent) => Ok(Some(tx.get_public_id(parent)?)),
                None => Ok(None),
            }
        })
    }

    pub fn count_resources(&self, level: ResourceLevel) -> Result<u64> {
        self.apply_read(|tx| tx.count_resources(level))
    }

    /// Deletes a resource and its whole subtree. The caller states the
    /// level it believes the resource to be at; a mismatch is treated as
    /// an unknown resource. Returns the closest surviving ancestor, whose
    /// last-update chain is refreshed.
    pub fn delete_resource(
        &self,
        public_id: &str,
        expected_level: ResourceLevel,
    ) -> Result<Option<RemainingAncestor>> {
        self.apply_write(|tx| {
            match tx.as_read().lookup_resource(public_id)? {
                Some((id, level)) if level == expected_level => {
                    tx.delete_resource(id)?;

                    let ancestor = tx.context().remaining_ancestor();
                    if let Some(ancestor) = &ancestor {
                        refresh_last_update(tx, &ancestor.public_id)?;
                    }
                    Ok(ancestor)
                }
                _ => Err(Error::UnknownResource(public_id.to_owned())),
            }
        })
    }

    /// Global statistics, recomputed in one backend call when supported
    /// and assembled from the individual counters otherwise.
    pub fn get_global_statistics(&self) -> Result<GlobalStatistics> {
        if self.capabilities().update_and_get_statistics && !self.is_read_only() {
            self.apply_write(|tx| tx.update_and_get_statistics())
        } else {
            self.apply_read(|tx| {
                Ok(GlobalStatistics {
                    disk_size: tx.get_total_compressed_size()?,
                    uncompressed_size: tx.get_total_uncompressed_size()?,
                    patients: tx.count_resources(ResourceLevel::Patient)?,
                    studies: tx.count_resources(ResourceLevel::Study)?,
                    series: tx.count_resources(ResourceLevel::Series)?,
                    instances: tx.count_resources(ResourceLevel::Instance)?,
                })
            })
        }
    }

    /// Walks the subtree of a resource, accumulating its attachment sizes
    /// and descendant counts.
    pub fn get_resource_statistics(
        &self,
        public_id: &str,
    ) -> Result<(ResourceLevel, ResourceStatistics)> {
        self.apply_read(|tx| {
            let (top, level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;

            let mut statistics = ResourceStatistics::default();
            let mut to_explore: Vec<ResourceId> = vec![top];

            while let Some(resource) = to_explore.pop() {
                let this_level = tx.get_resource_level(resource)?;

                for content_type in tx.list_attachments(resource)? {
                    if let Some((attachment, _revision)) =
                        tx.lookup_attachment(resource, content_type)?
                    {
                        if attachment.content_type == ContentType::DICOM {
                            statistics.dicom_disk_size += attachment.compressed_size;
                            statistics.dicom_uncompressed_size += attachment.uncompressed_size;
                        }
                        statistics.disk_size += attachment.compressed_size;
                        statistics.uncompressed_size += attachment.uncompressed_size;
                    }
                }

                match this_level {
                    ResourceLevel::Instance => statistics.instances += 1,
                    other => {
                        match other {
                            ResourceLevel::Study => statistics.studies += 1,
                            ResourceLevel::Series => statistics.series += 1,
                            _ => {}
                        }
                        to_explore.extend(tx.get_children(resource)?);
                    }
                }
            }

            // A series- or instance-level query still belongs to one study
            // and one series.
            statistics.studies = statistics.studies.max(1);
            statistics.series = statistics.series.max(1);

            Ok((level, statistics))
        })
    }

    // -- patient protection -----------------------------------------------

    /// Whether a patient is excluded from recycling. Non-patient resources
    /// are a parameter error.
    pub fn is_protected_patient(&self, public_id: &str) -> Result<bool> {
        self.apply_read(|tx| match tx.lookup_resource(public_id)? {
            Some((id, ResourceLevel::Patient)) => tx.is_protected_patient(id),
            _ => Err(Error::ParameterOutOfRange(format!(
                "{public_id} is not a patient"
            ))),
        })
    }

    pub fn set_protected_patient(&self, public_id: &str, protected: bool) -> Result<()> {
        self.apply_write(|tx| match tx.as_read().lookup_resource(public_id)? {
            Some((id, ResourceLevel::Patient)) => tx.set_protected_patient(id, protected),
            _ => Err(Error::ParameterOutOfRange(format!(
                "{public_id} is not a patient"
            ))),
        })?;

        if protected {
            info!("patient {public_id} has been protected");
        } else {
            info!("patient {public_id} has been unprotected");
        }
        Ok(())
    }

    // -- labels ------------------------------------------------------------

    pub fn add_label(&self, public_id: &str, level: ResourceLevel, label: &str) -> Result<()> {
        self.modify_label(public_id, level, label, true)
    }

    pub fn remove_label(&self, public_id: &str, level: ResourceLevel, label: &str) -> Result<()> {
        self.modify_label(public_id, level, label, false)
    }

    pub fn add_labels(
        &self,
        public_id: &str,
        level: ResourceLevel,
        labels: &BTreeSet<String>,
    ) -> Result<()> {
        for label in labels {
            self.modify_label(public_id, level, label, true)?;
        }
        Ok(())
    }

    pub fn list_labels(&self, public_id: &str) -> Result<BTreeSet<String>> {
        self.check_labels_support()?;
        self.apply_read(|tx| {
            let (id, _level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;
            tx.list_labels(id)
        })
    }

    pub fn list_all_labels(&self) -> Result<BTreeSet<String>> {
        self.check_labels_support()?;
        self.apply_read(|tx| tx.list_all_labels())
    }

    fn modify_label(
        &self,
        public_id: &str,
        level: ResourceLevel,
        label: &str,
        add: bool,
    ) -> Result<()> {
        self.check_labels_support()?;
        if !is_valid_label(label) {
            return Err(Error::ParameterOutOfRange(format!(
                "invalid label: {label}"
            )));
        }

        self.apply_write(|tx| match tx.as_read().lookup_resource(public_id)? {
            Some((id, found)) if found == level => {
                if add {
                    tx.add_label(id, label)
                } else {
                    tx.remove_label(id, label)
                }
            }
            _ => Err(Error::UnknownResource(public_id.to_owned())),
        })
    }

    fn check_labels_support(&self) -> Result<()> {
        if self.capabilities().labels {
            Ok(())
        } else {
            Err(Error::NotImplemented(
                "the backend has no support for labels".into(),
            ))
        }
    }
}

/// Refreshes the last-update metadata of a resource and all its parents.
fn refresh_last_update(
    tx: &mut crate::transaction::WriteTransaction<'_, '_>,
    public_id: &str,
) -> Result<()> {
    let now = Utc::now().format("%Y%m%dT%H%M%S").to_string();

    if let Some((mut id, _level)) = tx.as_read().lookup_resource(public_id)? {
        loop {
            tx.set_metadata(id, MetadataType::LAST_UPDATE, &now, 0)?;
            match tx.as_read().lookup_parent(id)? {
                Some(parent) => id = parent,
                None => break,
            }
        }
    }
    Ok(())
}
