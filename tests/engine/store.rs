//! Store Pipeline Tests
//!
//! Instance admission, hierarchy creation, derived metadata, overwrite
//! behavior and reconstruction.

use crate::common::*;
use archivedb::core::ResourceHasher;
use archivedb::prelude::*;
use archivedb::Archive;

// ============================================================================
// Hierarchy creation
// ============================================================================

#[test]
fn storing_creates_the_whole_hierarchy() {
    let archive = archive();
    store(&archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));

    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 1);
    assert_eq!(archive.count_resources(ResourceLevel::Study).unwrap(), 1);
    assert_eq!(archive.count_resources(ResourceLevel::Series).unwrap(), 1);
    assert_eq!(archive.count_resources(ResourceLevel::Instance).unwrap(), 1);
}

#[test]
fn public_ids_derive_from_identifying_tags() {
    let archive = archive();
    let tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    let result = store(&archive, tags.clone());

    let hasher = ResourceHasher::from_tags(&tags).unwrap();
    assert_eq!(result.patient_public_id, hasher.patient_hash());
    assert_eq!(result.study_public_id, hasher.study_hash());
    assert_eq!(result.series_public_id, hasher.series_hash());
    assert_eq!(result.instance_public_id, hasher.instance_hash());

    // Same content on a fresh archive maps to the same ids.
    let other = Archive::in_memory().unwrap();
    let again = store(&other, tags);
    assert_eq!(again.instance_public_id, result.instance_public_id);
}

#[test]
fn second_instance_reuses_existing_ancestors() {
    let archive = archive();
    store(&archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));
    store(&archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.6"));

    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 1);
    assert_eq!(archive.count_resources(ResourceLevel::Series).unwrap(), 1);
    assert_eq!(archive.count_resources(ResourceLevel::Instance).unwrap(), 2);
}

#[test]
fn empty_patient_id_is_tolerated() {
    let archive = archive();
    let mut tags = dataset("", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    tags.remove(tags::PATIENT_ID);
    store(&archive, tags);
    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 1);
}

#[test]
fn missing_instance_uid_is_rejected() {
    let archive = archive();
    let mut tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    tags.remove(tags::SOP_INSTANCE_UID);
    let err = archive.store_instance(&StoreRequest::new(tags)).unwrap_err();
    assert!(matches!(err, Error::ParameterOutOfRange(_)));
}

// ============================================================================
// Change events
// ============================================================================

#[test]
fn first_store_logs_creations_bottom_up() {
    let archive = archive();
    store(&archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));

    let page = archive.get_changes(0, 100).unwrap();
    let kinds: Vec<ChangeKind> = page.items.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::NewInstance,
            ChangeKind::NewSeries,
            ChangeKind::NewStudy,
            ChangeKind::NewPatient,
            ChangeKind::NewChildInstance,
            ChangeKind::NewChildInstance,
            ChangeKind::NewChildInstance,
        ]
    );
    assert!(page.done);
}

#[test]
fn repeat_store_in_a_series_only_logs_the_instance() {
    let archive = archive();
    store(&archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));
    let before = archive.get_changes(0, 100).unwrap().last;

    store(&archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.6"));
    let page = archive.get_changes(before, 100).unwrap();
    let kinds: Vec<ChangeKind> = page.items.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::NewInstance,
            ChangeKind::NewChildInstance,
            ChangeKind::NewChildInstance,
            ChangeKind::NewChildInstance,
        ]
    );
}

#[test]
fn a_series_completes_when_the_expected_count_is_reached() {
    let archive = archive();
    let mut tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    tags.set(tags::CARDIAC_NUMBER_OF_IMAGES, "2");
    tags.set(tags::INSTANCE_NUMBER, "1");
    store(&archive, tags);

    let completed = |archive: &Archive| {
        archive
            .get_changes(0, 100)
            .unwrap()
            .items
            .iter()
            .filter(|c| c.kind == ChangeKind::CompletedSeries)
            .count()
    };
    assert_eq!(completed(&archive), 0);

    let mut tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.6");
    tags.set(tags::CARDIAC_NUMBER_OF_IMAGES, "2");
    tags.set(tags::INSTANCE_NUMBER, "2");
    store(&archive, tags);
    assert_eq!(completed(&archive), 1);
}

// ============================================================================
// Instance metadata
// ============================================================================

#[test]
fn provenance_is_recorded_on_the_instance() {
    let archive = archive();
    let mut request = StoreRequest::new(dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));
    request.origin = StoreOrigin {
        origin: RequestOrigin::DicomProtocol,
        remote_aet: "CT_SCANNER".into(),
        remote_ip: Some("10.0.0.7".into()),
        called_aet: Some("ARCHIVE".into()),
        http_username: None,
    };
    request.transfer_syntax = Some("1.2.840.10008.1.2.1".into());

    let result = archive.store_instance(&request).unwrap();
    let metadata = &result.instance_metadata;
    assert_eq!(metadata.get(&MetadataType::ORIGIN).unwrap(), "DicomProtocol");
    assert_eq!(metadata.get(&MetadataType::REMOTE_AET).unwrap(), "CT_SCANNER");
    assert_eq!(metadata.get(&MetadataType::REMOTE_IP).unwrap(), "10.0.0.7");
    assert_eq!(metadata.get(&MetadataType::CALLED_AET).unwrap(), "ARCHIVE");
    assert!(!metadata.contains_key(&MetadataType::HTTP_USERNAME));
    assert_eq!(
        metadata.get(&MetadataType::TRANSFER_SYNTAX).unwrap(),
        "1.2.840.10008.1.2.1"
    );
    assert!(metadata.contains_key(&MetadataType::RECEPTION_DATE));
}

#[test]
fn index_in_series_prefers_the_instance_number() {
    let archive = archive();
    let mut tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    tags.set(tags::INSTANCE_NUMBER, " 7 ");
    tags.set(tags::IMAGE_INDEX, "99");
    let result = store(&archive, tags);
    assert_eq!(
        result.instance_metadata.get(&MetadataType::INDEX_IN_SERIES).unwrap(),
        "7"
    );

    // Image index is the fallback, and blank values are dropped entirely.
    let mut tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.6");
    tags.set(tags::IMAGE_INDEX, "4");
    let result = store(&archive, tags);
    assert_eq!(
        result.instance_metadata.get(&MetadataType::INDEX_IN_SERIES).unwrap(),
        "4"
    );

    let mut tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.7");
    tags.set(tags::INSTANCE_NUMBER, "   ");
    let result = store(&archive, tags);
    assert!(!result.instance_metadata.contains_key(&MetadataType::INDEX_IN_SERIES));
}

#[test]
fn pixel_data_vr_is_only_recorded_with_an_offset() {
    let archive = archive();
    let mut request = StoreRequest::new(dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));
    request.pixel_data_vr = Some("OW".into());
    let result = archive.store_instance(&request).unwrap();
    assert!(!result.instance_metadata.contains_key(&MetadataType::PIXEL_DATA_VR));

    let mut request = StoreRequest::new(dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.6"));
    request.pixel_data_offset = Some(132);
    request.pixel_data_vr = Some("OW".into());
    let result = archive.store_instance(&request).unwrap();
    assert_eq!(result.instance_metadata.get(&MetadataType::PIXEL_DATA_OFFSET).unwrap(), "132");
    assert_eq!(result.instance_metadata.get(&MetadataType::PIXEL_DATA_VR).unwrap(), "OW");
}

// ============================================================================
// Duplicates, overwrite, reconstruction
// ============================================================================

#[test]
fn duplicate_instances_answer_already_stored() {
    let archive = archive();
    let tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    store(&archive, tags.clone());

    let result = archive.store_instance(&StoreRequest::new(tags)).unwrap();
    assert_eq!(result.status, StoreStatus::AlreadyStored);
    // The report carries the metadata of the instance already in place.
    assert!(result.instance_metadata.contains_key(&MetadataType::RECEPTION_DATE));

    assert_eq!(archive.count_resources(ResourceLevel::Instance).unwrap(), 1);
}

#[test]
fn overwrite_replaces_the_stored_instance() {
    let archive = Archive::builder().overwrite_instances(true).build().unwrap();
    let tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    store_with_file(&archive, tags.clone(), 100);

    let result = archive
        .store_instance(&request_with_file(tags, 250))
        .unwrap();
    assert_eq!(result.status, StoreStatus::Success);

    assert_eq!(archive.count_resources(ResourceLevel::Instance).unwrap(), 1);
    let stats = archive.get_global_statistics().unwrap();
    assert_eq!(stats.disk_size, 250);
}

#[test]
fn reconstruction_refreshes_without_change_events() {
    let archive = archive();
    let tags = dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
    store(&archive, tags.clone());
    let before = archive.get_changes(0, 100).unwrap().last;

    let mut request = StoreRequest::new(tags);
    request.transfer_syntax = Some("1.2.840.10008.1.2.4.70".into());
    let result = archive.reconstruct_instance(&request).unwrap();
    assert_eq!(result.status, StoreStatus::Success);
    assert_eq!(
        result.instance_metadata.get(&MetadataType::TRANSFER_SYNTAX).unwrap(),
        "1.2.840.10008.1.2.4.70"
    );

    let page = archive.get_changes(before, 100).unwrap();
    assert!(page.items.is_empty());
}

#[test]
fn reconstructing_an_unknown_instance_is_an_error() {
    let archive = archive();
    let request = StoreRequest::new(dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));
    let err = archive.reconstruct_instance(&request).unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[test]
fn stores_are_rejected_on_a_read_only_archive() {
    let archive = Archive::builder().read_only().build().unwrap();
    let request = StoreRequest::new(dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5"));
    let err = archive.store_instance(&request).unwrap_err();
    assert!(matches!(err, Error::ReadOnly));
}
