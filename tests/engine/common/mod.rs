//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use archivedb::prelude::*;
use archivedb::Archive;

pub fn archive() -> Archive {
    Archive::in_memory().unwrap()
}

/// A minimal valid dataset: the four identifying tags.
pub fn dataset(patient: &str, study: &str, series: &str, sop: &str) -> TagSet {
    let mut tags = TagSet::new();
    tags.set(tags::PATIENT_ID, patient);
    tags.set(tags::STUDY_INSTANCE_UID, study);
    tags.set(tags::SERIES_INSTANCE_UID, series);
    tags.set(tags::SOP_INSTANCE_UID, sop);
    tags
}

/// Numbered instances of one fixed series, for tests that only care about
/// cardinality.
pub fn nth_dataset(patient: &str, n: u32) -> TagSet {
    dataset(
        patient,
        &format!("{patient}.study"),
        &format!("{patient}.series"),
        &format!("{patient}.sop.{n}"),
    )
}

/// A store request carrying one DICOM attachment of `size` bytes.
pub fn request_with_file(tags: TagSet, size: u64) -> StoreRequest {
    let mut request = StoreRequest::new(tags);
    request
        .attachments
        .push(FileInfo::uncompressed(ContentType::DICOM, size, "checksum"));
    request
}

pub fn store(archive: &Archive, tags: TagSet) -> StoreResult {
    let result = archive.store_instance(&StoreRequest::new(tags)).unwrap();
    assert_eq!(result.status, StoreStatus::Success);
    result
}

pub fn store_with_file(archive: &Archive, tags: TagSet, size: u64) -> StoreResult {
    let result = archive
        .store_instance(&request_with_file(tags, size))
        .unwrap();
    assert_eq!(result.status, StoreStatus::Success);
    result
}
