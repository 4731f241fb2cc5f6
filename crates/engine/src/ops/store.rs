//! Instance admission: the store pipeline, instance reconstruction and the
//! standalone attachment write. These are the only operations that trigger
//! quota enforcement.

use crate::config::QuotaConfig;
use crate::index::Index;
use crate::transaction::WriteTransaction;
use archive_core::{
    tags, Backend, ChangeKind, Error, FileInfo, MetadataType, QuotaPolicy, ResourceHasher,
    ResourceId, ResourceLevel, Result, SeriesStatus, StoreStatus, TagSet,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Channel through which an instance reached the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestOrigin {
    #[default]
    Unknown,
    DicomProtocol,
    RestApi,
    Plugins,
    Lua,
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestOrigin::Unknown => "Unknown",
            RequestOrigin::DicomProtocol => "DicomProtocol",
            RequestOrigin::RestApi => "RestApi",
            RequestOrigin::Plugins => "Plugins",
            RequestOrigin::Lua => "Lua",
        };
        f.write_str(s)
    }
}

/// Provenance of a stored instance, recorded as instance metadata.
#[derive(Debug, Clone, Default)]
pub struct StoreOrigin {
    pub origin: RequestOrigin,
    /// Application entity title of the sender; empty when unknown.
    pub remote_aet: String,
    pub remote_ip: Option<String>,
    pub called_aet: Option<String>,
    pub http_username: Option<String>,
}

/// Everything needed to admit one instance.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub tags: TagSet,
    pub attachments: Vec<FileInfo>,
    /// Caller-supplied metadata, applied at the given hierarchy level.
    pub metadata: Vec<(ResourceLevel, MetadataType, String)>,
    pub origin: StoreOrigin,
    pub transfer_syntax: Option<String>,
    pub pixel_data_offset: Option<u64>,
    /// Value representation of the pixel data, only when it departs from
    /// the standard one for the transfer syntax.
    pub pixel_data_vr: Option<String>,
}

impl StoreRequest {
    pub fn new(tags: TagSet) -> StoreRequest {
        StoreRequest {
            tags,
            attachments: Vec::new(),
            metadata: Vec::new(),
            origin: StoreOrigin::default(),
            transfer_syntax: None,
            pixel_data_offset: None,
            pixel_data_vr: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreResult {
    pub status: StoreStatus,
    pub patient_public_id: String,
    pub study_public_id: String,
    pub series_public_id: String,
    pub instance_public_id: String,
    /// Metadata of the instance after the operation. On `AlreadyStored`
    /// this reflects the pre-existing entries.
    pub instance_metadata: BTreeMap<MetadataType, String>,
}

struct ResourceHashes {
    patient: String,
    study: String,
    series: String,
    instance: String,
}

impl ResourceHashes {
    fn compute(tags: &TagSet) -> Result<ResourceHashes> {
        let hasher = ResourceHasher::from_tags(tags)?;
        Ok(ResourceHashes {
            patient: hasher.patient_hash(),
            study: hasher.study_hash(),
            series: hasher.series_hash(),
            instance: hasher.instance_hash(),
        })
    }
}

impl<B: Backend> Index<B> {
    /// Admits one instance, creating any missing ancestors. A full storage
    /// area surfaces as `StoreStatus::StorageFull`, not as an error.
    pub fn store_instance(&self, request: &StoreRequest) -> Result<StoreResult> {
        let overwrite = self.overwrite_instances();
        match self.store_internal(request, overwrite, false) {
            Ok(result) => Ok(result),
            Err(Error::StorageFull(message)) => {
                warn!("cannot store instance: {message}");
                let hashes = ResourceHashes::compute(&request.tags)?;
                Ok(StoreResult {
                    status: StoreStatus::StorageFull,
                    patient_public_id: hashes.patient,
                    study_public_id: hashes.study,
                    series_public_id: hashes.series,
                    instance_public_id: hashes.instance,
                    instance_metadata: BTreeMap::new(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Re-runs the store pipeline against an instance that already exists,
    /// refreshing its main tags, attachments and derived metadata without
    /// emitting any change event and without touching the quota.
    pub fn reconstruct_instance(&self, request: &StoreRequest) -> Result<StoreResult> {
        self.store_internal(request, false, true)
    }

    fn store_internal(
        &self,
        request: &StoreRequest,
        overwrite: bool,
        is_reconstruct: bool,
    ) -> Result<StoreResult> {
        let hashes = ResourceHashes::compute(&request.tags)?;
        let quota = self.quota();
        let expected_instances = compute_expected_instances(&request.tags);

        self.apply_write(|tx| {
            store_in_transaction(
                tx,
                request,
                &hashes,
                expected_instances,
                overwrite,
                is_reconstruct,
                &quota,
            )
        })
    }

    /// Writes one attachment onto an existing resource, optionally guarded
    /// by the revision and checksum of the attachment being replaced.
    /// Returns the revision assigned to the new attachment.
    pub fn add_attachment(
        &self,
        attachment: &FileInfo,
        public_id: &str,
        precondition: Option<(i64, &str)>,
    ) -> Result<i64> {
        let quota = self.quota();

        self.apply_write(|tx| {
            let (resource, level) = tx
                .as_read()
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;

            let new_revision =
                match tx.as_read().lookup_attachment(resource, attachment.content_type)? {
                    Some((old_file, old_revision)) => {
                        if let Some((expected_revision, expected_checksum)) = precondition {
                            if old_revision != expected_revision
                                || old_file.uncompressed_checksum != expected_checksum
                            {
                                return Err(Error::Revision(format!(
                                    "outdated revision of attachment {} on resource {public_id}",
                                    attachment.content_type.0
                                )));
                            }
                        }
                        tx.delete_attachment(resource, attachment.content_type)?;
                        old_revision + 1
                    }
                    // No previous attachment: start a fresh revision
                    // sequence, whatever the precondition says.
                    None => 0,
                };

            // Walk up to the patient so recycling never evicts the target
            // of this very write.
            let mut patient = resource;
            while let Some(parent) = tx.as_read().lookup_parent(patient)? {
                patient = parent;
            }
            let patient_public_id = tx.as_read().get_public_id(patient)?;

            enforce_quota(tx, &quota, attachment.compressed_size, &patient_public_id)?;

            tx.add_attachment(resource, attachment, new_revision)?;

            if attachment.content_type.is_user() {
                tx.log_change(ChangeKind::UpdatedAttachment, level, public_id)?;
            }

            Ok(new_revision)
        })
    }
}

fn enforce_quota(
    tx: &mut WriteTransaction<'_, '_>,
    quota: &QuotaConfig,
    added_bytes: u64,
    protected_patient: &str,
) -> Result<()> {
    match quota.policy {
        QuotaPolicy::Reject => {
            if tx
                .as_read()
                .has_reached_max_storage_size(quota.max_storage_bytes, added_bytes)?
            {
                return Err(Error::StorageFull("maximum storage size reached".into()));
            }
            if tx
                .as_read()
                .has_reached_max_patient_count(quota.max_patient_count)?
            {
                return Err(Error::StorageFull("maximum patient count reached".into()));
            }
            Ok(())
        }
        QuotaPolicy::Recycle => tx.recycle(
            quota.max_storage_bytes,
            quota.max_patient_count,
            added_bytes,
            Some(protected_patient),
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn store_in_transaction(
    tx: &mut WriteTransaction<'_, '_>,
    request: &StoreRequest,
    hashes: &ResourceHashes,
    expected_instances: Option<i64>,
    overwrite: bool,
    is_reconstruct: bool,
    quota: &QuotaConfig,
) -> Result<StoreResult> {
    let mut created = tx.create_instance(
        &hashes.patient,
        &hashes.study,
        &hashes.series,
        &hashes.instance,
    )?;

    if is_reconstruct && created.is_new_instance {
        return Err(Error::Internal(
            "new instance while reconstructing, this should not happen".into(),
        ));
    }

    if !created.is_new_instance && !is_reconstruct {
        if overwrite {
            info!("overwriting instance: {}", hashes.instance);
            tx.delete_resource(created.instance)?;

            // Recreate now that the old subtree is gone. Under weak
            // isolation a concurrent writer may have pushed the same
            // instance in between; the retry loop handles the conflict.
            created = tx.create_instance(
                &hashes.patient,
                &hashes.study,
                &hashes.series,
                &hashes.instance,
            )?;
            if !created.is_new_instance {
                return Err(Error::DuplicateResource(format!(
                    "no new instance while overwriting {}",
                    hashes.instance
                )));
            }
        } else {
            let instance_metadata = tx
                .as_read()
                .get_all_metadata(created.instance)?
                .into_iter()
                .map(|(kind, (value, _revision))| (kind, value))
                .collect();
            return Ok(StoreResult {
                status: StoreStatus::AlreadyStored,
                patient_public_id: hashes.patient.clone(),
                study_public_id: hashes.study.clone(),
                series_public_id: hashes.series.clone(),
                instance_public_id: hashes.instance.clone(),
                instance_metadata,
            });
        }
    }

    if !is_reconstruct {
        // Creation events, ordered from instance to patient.
        tx.log_change(ChangeKind::NewInstance, ResourceLevel::Instance, &hashes.instance)?;
        if created.is_new_series {
            tx.log_change(ChangeKind::NewSeries, ResourceLevel::Series, &hashes.series)?;
        }
        if created.is_new_study {
            tx.log_change(ChangeKind::NewStudy, ResourceLevel::Study, &hashes.study)?;
        }
        if created.is_new_patient {
            tx.log_change(ChangeKind::NewPatient, ResourceLevel::Patient, &hashes.patient)?;
        }
    }

    let instance_size: u64 = request
        .attachments
        .iter()
        .map(|attachment| attachment.compressed_size)
        .sum();

    // Reconstruction replaces content in place and must not affect quotas.
    if !is_reconstruct {
        enforce_quota(tx, quota, instance_size, &hashes.patient)?;
    }

    for attachment in &request.attachments {
        if is_reconstruct {
            tx.delete_attachment(created.instance, attachment.content_type)?;
        }
        tx.add_attachment(created.instance, attachment, 0)?;
    }

    let mut instance_metadata = BTreeMap::new();

    // Caller-supplied metadata. During a reconstruction this carries every
    // past entry worth keeping, system ones included.
    for (level, kind, value) in &request.metadata {
        if *level == ResourceLevel::Instance {
            set_instance_metadata(tx, &mut instance_metadata, created.instance, *kind, value)?;
        } else {
            let target = resource_at(&created, *level);
            tx.set_metadata(target, *kind, value, 0)?;
        }
    }

    let now = Utc::now().format("%Y%m%dT%H%M%S").to_string();

    if !is_reconstruct {
        // Main tags and their signature for the newly created resources.
        tx.set_main_tags(created.instance, &request.tags.extract_main_tags(ResourceLevel::Instance))?;
        set_instance_metadata(
            tx,
            &mut instance_metadata,
            created.instance,
            MetadataType::MAIN_TAGS_SIGNATURE,
            &tags::main_tags_signature(ResourceLevel::Instance),
        )?;
        if let Some(json) = sequences_json(&request.tags)? {
            set_instance_metadata(
                tx,
                &mut instance_metadata,
                created.instance,
                MetadataType::MAIN_SEQUENCES,
                &json,
            )?;
        }

        for level in [ResourceLevel::Series, ResourceLevel::Study, ResourceLevel::Patient] {
            if is_new_at(&created, level) {
                let target = resource_at(&created, level);
                tx.set_main_tags(target, &request.tags.extract_main_tags(level))?;
                tx.set_metadata(
                    target,
                    MetadataType::MAIN_TAGS_SIGNATURE,
                    &tags::main_tags_signature(level),
                    0,
                )?;
                if let Some(json) = sequences_json(&request.tags)? {
                    tx.set_metadata(target, MetadataType::MAIN_SEQUENCES, &json, 0)?;
                }
            }
        }

        // Ancestors are touched even when they pre-existed.
        tx.set_metadata(created.series, MetadataType::LAST_UPDATE, &now, 0)?;
        tx.set_metadata(created.study, MetadataType::LAST_UPDATE, &now, 0)?;
        tx.set_metadata(created.patient, MetadataType::LAST_UPDATE, &now, 0)?;

        if created.is_new_series {
            if let Some(expected) = expected_instances {
                tx.set_metadata(
                    created.series,
                    MetadataType::EXPECTED_INSTANCES,
                    &expected.to_string(),
                    0,
                )?;
            }
            tx.set_metadata(
                created.series,
                MetadataType::REMOTE_AET,
                &request.origin.remote_aet,
                0,
            )?;
        }

        set_instance_metadata(
            tx,
            &mut instance_metadata,
            created.instance,
            MetadataType::RECEPTION_DATE,
            &now,
        )?;
        set_instance_metadata(
            tx,
            &mut instance_metadata,
            created.instance,
            MetadataType::REMOTE_AET,
            &request.origin.remote_aet,
        )?;
        set_instance_metadata(
            tx,
            &mut instance_metadata,
            created.instance,
            MetadataType::ORIGIN,
            &request.origin.origin.to_string(),
        )?;

        if let Some(remote_ip) = &request.origin.remote_ip {
            set_instance_metadata(
                tx,
                &mut instance_metadata,
                created.instance,
                MetadataType::REMOTE_IP,
                remote_ip,
            )?;
        }
        if let Some(called_aet) = &request.origin.called_aet {
            set_instance_metadata(
                tx,
                &mut instance_metadata,
                created.instance,
                MetadataType::CALLED_AET,
                called_aet,
            )?;
        }
        if let Some(http_username) = &request.origin.http_username {
            set_instance_metadata(
                tx,
                &mut instance_metadata,
                created.instance,
                MetadataType::HTTP_USERNAME,
                http_username,
            )?;
        }
    }

    // The following entries are refreshed even when reconstructing: they
    // may be missing on instances stored by older versions of the schema.

    if let Some(transfer_syntax) = &request.transfer_syntax {
        set_instance_metadata(
            tx,
            &mut instance_metadata,
            created.instance,
            MetadataType::TRANSFER_SYNTAX,
            transfer_syntax,
        )?;
    }

    if let Some(offset) = request.pixel_data_offset {
        set_instance_metadata(
            tx,
            &mut instance_metadata,
            created.instance,
            MetadataType::PIXEL_DATA_OFFSET,
            &offset.to_string(),
        )?;

        if let Some(vr) = &request.pixel_data_vr {
            set_instance_metadata(
                tx,
                &mut instance_metadata,
                created.instance,
                MetadataType::PIXEL_DATA_VR,
                vr,
            )?;
        }
    }

    if let Some(sop_class_uid) = request.tags.get(tags::SOP_CLASS_UID) {
        set_instance_metadata(
            tx,
            &mut instance_metadata,
            created.instance,
            MetadataType::SOP_CLASS_UID,
            sop_class_uid,
        )?;
    }

    let index_in_series = request
        .tags
        .get(tags::INSTANCE_NUMBER)
        .or_else(|| request.tags.get(tags::IMAGE_INDEX));
    if let Some(value) = index_in_series {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            set_instance_metadata(
                tx,
                &mut instance_metadata,
                created.instance,
                MetadataType::INDEX_IN_SERIES,
                trimmed,
            )?;
        }
    }

    if !is_reconstruct {
        if let Some(expected) = expected_instances {
            if tx.as_read().series_status(created.series, expected)? == SeriesStatus::Complete {
                tx.log_change(ChangeKind::CompletedSeries, ResourceLevel::Series, &hashes.series)?;
            }
        }

        tx.log_change(ChangeKind::NewChildInstance, ResourceLevel::Series, &hashes.series)?;
        tx.log_change(ChangeKind::NewChildInstance, ResourceLevel::Study, &hashes.study)?;
        tx.log_change(ChangeKind::NewChildInstance, ResourceLevel::Patient, &hashes.patient)?;

        tx.context().mark_unstable(ResourceLevel::Series, &hashes.series);
        tx.context().mark_unstable(ResourceLevel::Study, &hashes.study);
        tx.context().mark_unstable(ResourceLevel::Patient, &hashes.patient);
    }

    Ok(StoreResult {
        status: StoreStatus::Success,
        patient_public_id: hashes.patient.clone(),
        study_public_id: hashes.study.clone(),
        series_public_id: hashes.series.clone(),
        instance_public_id: hashes.instance.clone(),
        instance_metadata,
    })
}

fn resource_at(created: &archive_core::CreatedInstance, level: ResourceLevel) -> ResourceId {
    match level {
        ResourceLevel::Patient => created.patient,
        ResourceLevel::Study => created.study,
        ResourceLevel::Series => created.series,
        ResourceLevel::Instance => created.instance,
    }
}

fn is_new_at(created: &archive_core::CreatedInstance, level: ResourceLevel) -> bool {
    match level {
        ResourceLevel::Patient => created.is_new_patient,
        ResourceLevel::Study => created.is_new_study,
        ResourceLevel::Series => created.is_new_series,
        ResourceLevel::Instance => created.is_new_instance,
    }
}

fn set_instance_metadata(
    tx: &mut WriteTransaction<'_, '_>,
    recorded: &mut BTreeMap<MetadataType, String>,
    instance: ResourceId,
    kind: MetadataType,
    value: &str,
) -> Result<()> {
    tx.set_metadata(instance, kind, value, 0)?;
    recorded.insert(kind, value.to_owned());
    Ok(())
}

fn sequences_json(tags: &TagSet) -> Result<Option<String>> {
    if tags.sequences().is_empty() {
        Ok(None)
    } else {
        let json = serde_json::to_string(tags.sequences())
            .map_err(|err| Error::Internal(format!("cannot serialize sequences: {err}")))?;
        Ok(Some(json))
    }
}

/// Derives the number of instances the series should eventually contain,
/// from modality-specific tags. An unparsable or non-positive value
/// disables the heuristic rather than trying the next rule.
fn compute_expected_instances(tags: &TagSet) -> Option<i64> {
    fn parse(value: &str) -> Option<i64> {
        value.trim().parse().ok()
    }

    if let (Some(images), Some(positions)) = (
        tags.get(tags::IMAGES_IN_ACQUISITION),
        tags.get(tags::NUMBER_OF_TEMPORAL_POSITIONS),
    ) {
        // Series with temporal positions
        let target = parse(images)? * parse(positions)?;
        return (target > 0).then_some(target);
    }

    if let (Some(slices), Some(time_slices)) = (
        tags.get(tags::NUMBER_OF_SLICES),
        tags.get(tags::NUMBER_OF_TIME_SLICES),
    ) {
        // Cardio-PET images
        let target = parse(slices)? * parse(time_slices)?;
        return (target > 0).then_some(target);
    }

    if let Some(images) = tags.get(tags::CARDIAC_NUMBER_OF_IMAGES) {
        let target = parse(images)?;
        return (target > 0).then_some(target);
    }

    None
}
