//! Quota and Recycling Tests
//!
//! The Reject policy refuses admissions that would exceed a ceiling; the
//! Recycle policy evicts least-recently-used patients to make room.

use crate::common::*;
use archivedb::prelude::*;
use archivedb::Archive;

fn quota_archive(policy: QuotaPolicy, max_bytes: u64, max_patients: u64) -> Archive {
    Archive::builder()
        .quota(QuotaConfig {
            max_storage_bytes: max_bytes,
            max_patient_count: max_patients,
            policy,
        })
        .build()
        .unwrap()
}

// ============================================================================
// Reject policy
// ============================================================================

#[test]
fn reject_policy_reports_storage_full() {
    let archive = quota_archive(QuotaPolicy::Reject, 1000, 0);
    store_with_file(&archive, nth_dataset("P1", 1), 600);

    let result = archive
        .store_instance(&request_with_file(nth_dataset("P2", 1), 600))
        .unwrap();
    assert_eq!(result.status, StoreStatus::StorageFull);

    // The refused admission leaves no trace.
    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 1);
    assert_eq!(archive.get_global_statistics().unwrap().disk_size, 600);
}

#[test]
fn reject_policy_enforces_the_patient_ceiling() {
    let archive = quota_archive(QuotaPolicy::Reject, 0, 2);
    store(&archive, nth_dataset("P1", 1));
    store(&archive, nth_dataset("P2", 1));

    let result = archive
        .store_instance(&StoreRequest::new(nth_dataset("P3", 1)))
        .unwrap();
    assert_eq!(result.status, StoreStatus::StorageFull);
    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 2);

    // More content for a known patient is still admitted.
    store(&archive, nth_dataset("P1", 2));
}

#[test]
fn an_instance_larger_than_the_ceiling_never_fits() {
    let archive = quota_archive(QuotaPolicy::Reject, 1000, 0);
    let result = archive
        .store_instance(&request_with_file(nth_dataset("P1", 1), 2000))
        .unwrap();
    assert_eq!(result.status, StoreStatus::StorageFull);
}

// ============================================================================
// Recycle policy
// ============================================================================

#[test]
fn recycling_evicts_the_least_recently_used_patient() {
    let archive = quota_archive(QuotaPolicy::Recycle, 1000, 0);
    let first = store_with_file(&archive, nth_dataset("P1", 1), 600);
    let second = store_with_file(&archive, nth_dataset("P2", 1), 600);

    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 1);
    assert!(!archive.resource_exists(&first.patient_public_id).unwrap());
    assert!(archive.resource_exists(&second.patient_public_id).unwrap());
    assert_eq!(archive.get_global_statistics().unwrap().disk_size, 600);
}

#[test]
fn receiving_content_refreshes_the_recycling_order() {
    let archive = quota_archive(QuotaPolicy::Recycle, 1500, 0);
    let first = store_with_file(&archive, nth_dataset("P1", 1), 600);
    let second = store_with_file(&archive, nth_dataset("P2", 1), 600);

    // P1 receives again and becomes the most recently used patient.
    store_with_file(&archive, nth_dataset("P1", 2), 100);

    store_with_file(&archive, nth_dataset("P3", 1), 600);
    assert!(archive.resource_exists(&first.patient_public_id).unwrap());
    assert!(!archive.resource_exists(&second.patient_public_id).unwrap());
}

#[test]
fn the_receiving_patient_is_never_its_own_victim() {
    let archive = quota_archive(QuotaPolicy::Recycle, 1000, 0);
    let first = store_with_file(&archive, nth_dataset("P1", 1), 600);

    // A second instance of the same patient: eviction must pick nobody
    // else, so the admission fails outright.
    let result = archive
        .store_instance(&request_with_file(nth_dataset("P1", 2), 600))
        .unwrap();
    assert_eq!(result.status, StoreStatus::StorageFull);
    assert!(archive.resource_exists(&first.patient_public_id).unwrap());
}

#[test]
fn protected_patients_are_skipped() {
    let archive = quota_archive(QuotaPolicy::Recycle, 1500, 0);
    let first = store_with_file(&archive, nth_dataset("P1", 1), 600);
    let second = store_with_file(&archive, nth_dataset("P2", 1), 600);

    archive.set_protected_patient(&first.patient_public_id, true).unwrap();
    assert!(archive.is_protected_patient(&first.patient_public_id).unwrap());

    store_with_file(&archive, nth_dataset("P3", 1), 600);
    assert!(archive.resource_exists(&first.patient_public_id).unwrap());
    assert!(!archive.resource_exists(&second.patient_public_id).unwrap());
}

#[test]
fn recycling_caps_the_patient_count() {
    let archive = quota_archive(QuotaPolicy::Recycle, 0, 2);
    let first = store(&archive, nth_dataset("P1", 1));
    store(&archive, nth_dataset("P2", 1));
    store(&archive, nth_dataset("P3", 1));

    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 2);
    assert!(!archive.resource_exists(&first.patient_public_id).unwrap());
}

#[test]
fn evictions_appear_in_the_change_log() {
    let archive = quota_archive(QuotaPolicy::Recycle, 1000, 0);
    store_with_file(&archive, nth_dataset("P1", 1), 600);
    let before = archive.get_changes(0, 100).unwrap().last;
    store_with_file(&archive, nth_dataset("P2", 1), 600);

    let page = archive.get_changes(before, 100).unwrap();
    let deleted = page
        .items
        .iter()
        .filter(|c| c.kind == ChangeKind::Deleted)
        .count();
    // Instance, series, study and patient of P1.
    assert_eq!(deleted, 4);
}

// ============================================================================
// Standalone attachments under quota
// ============================================================================

#[test]
fn standalone_attachments_respect_the_quota() {
    let archive = quota_archive(QuotaPolicy::Reject, 1000, 0);
    let result = store_with_file(&archive, nth_dataset("P1", 1), 600);

    let big = FileInfo::uncompressed(ContentType(1030), 600, "big");
    let err = archive
        .add_attachment(&big, &result.study_public_id, None)
        .unwrap_err();
    assert!(matches!(err, Error::StorageFull(_)));

    let small = FileInfo::uncompressed(ContentType(1030), 100, "small");
    archive.add_attachment(&small, &result.study_public_id, None).unwrap();
}

#[test]
fn attachment_writes_protect_their_own_patient() {
    let archive = quota_archive(QuotaPolicy::Recycle, 1000, 0);
    let result = store_with_file(&archive, nth_dataset("P1", 1), 600);

    // Making room would require evicting P1 itself, so the write fails.
    let big = FileInfo::uncompressed(ContentType(1030), 600, "big");
    let err = archive
        .add_attachment(&big, &result.instance_public_id, None)
        .unwrap_err();
    assert!(matches!(err, Error::StorageFull(_)));
    assert!(archive.resource_exists(&result.patient_public_id).unwrap());
}

#[test]
fn standalone_recycling_trims_an_oversized_archive() {
    let archive = quota_archive(QuotaPolicy::Recycle, 0, 0);
    store_with_file(&archive, nth_dataset("P1", 1), 600);
    store_with_file(&archive, nth_dataset("P2", 1), 600);

    // Tightening the quota at runtime, then reclaiming.
    archive.set_quota(QuotaConfig {
        max_storage_bytes: 1000,
        max_patient_count: 0,
        policy: QuotaPolicy::Recycle,
    });
    archive.standalone_recycling().unwrap();

    assert_eq!(archive.count_resources(ResourceLevel::Patient).unwrap(), 1);
    assert_eq!(archive.get_global_statistics().unwrap().disk_size, 600);
}
