//! Revisioned Metadata and Attachment Tests
//!
//! Optimistic concurrency on metadata entries and attachments: revision
//! counters, checksum preconditions, and the change events user entries
//! emit.

use crate::common::*;
use archivedb::core::hash::content_checksum;
use archivedb::prelude::*;

const NOTES: MetadataType = MetadataType(2048);
const REPORT: ContentType = ContentType(1030);

fn stored_study(archive: &archivedb::Archive) -> String {
    store(archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5")).study_public_id
}

// ============================================================================
// Metadata revisions
// ============================================================================

#[test]
fn fresh_metadata_starts_at_revision_zero() {
    let archive = archive();
    let study = stored_study(&archive);

    let revision = archive.set_metadata(&study, NOTES, "first", None).unwrap();
    assert_eq!(revision, 0);

    let (value, revision) = archive.lookup_metadata(&study, NOTES).unwrap().unwrap();
    assert_eq!(value, "first");
    assert_eq!(revision, 0);
}

#[test]
fn updates_increment_the_revision() {
    let archive = archive();
    let study = stored_study(&archive);

    archive.set_metadata(&study, NOTES, "first", None).unwrap();
    let revision = archive.set_metadata(&study, NOTES, "second", None).unwrap();
    assert_eq!(revision, 1);
}

#[test]
fn stale_metadata_preconditions_are_rejected() {
    let archive = archive();
    let study = stored_study(&archive);
    archive.set_metadata(&study, NOTES, "first", None).unwrap();

    // Wrong revision.
    let err = archive
        .set_metadata(&study, NOTES, "second", Some((5, &content_checksum(b"first"))))
        .unwrap_err();
    assert!(matches!(err, Error::Revision(_)));

    // Right revision, wrong checksum of the value being replaced.
    let err = archive
        .set_metadata(&study, NOTES, "second", Some((0, &content_checksum(b"other"))))
        .unwrap_err();
    assert!(matches!(err, Error::Revision(_)));

    // Matching precondition goes through.
    let revision = archive
        .set_metadata(&study, NOTES, "second", Some((0, &content_checksum(b"first"))))
        .unwrap();
    assert_eq!(revision, 1);
}

#[test]
fn preconditions_are_ignored_for_absent_entries() {
    let archive = archive();
    let study = stored_study(&archive);

    let revision = archive
        .set_metadata(&study, NOTES, "first", Some((42, "bogus")))
        .unwrap();
    assert_eq!(revision, 0);
}

#[test]
fn guarded_metadata_deletion() {
    let archive = archive();
    let study = stored_study(&archive);
    archive.set_metadata(&study, NOTES, "first", None).unwrap();

    let err = archive
        .delete_metadata(&study, NOTES, Some((1, &content_checksum(b"first"))))
        .unwrap_err();
    assert!(matches!(err, Error::Revision(_)));

    let existed = archive
        .delete_metadata(&study, NOTES, Some((0, &content_checksum(b"first"))))
        .unwrap();
    assert!(existed);
    assert!(archive.lookup_metadata(&study, NOTES).unwrap().is_none());

    // Deleting again reports the absence without failing.
    assert!(!archive.delete_metadata(&study, NOTES, None).unwrap());
}

#[test]
fn user_metadata_emits_update_changes() {
    let archive = archive();
    let study = stored_study(&archive);
    let before = archive.get_changes(0, 100).unwrap().last;

    archive.set_metadata(&study, NOTES, "first", None).unwrap();
    // System entries stay silent.
    archive
        .set_metadata(&study, MetadataType::LAST_UPDATE, "20260830T120000", None)
        .unwrap();

    let page = archive.get_changes(before, 100).unwrap();
    let kinds: Vec<ChangeKind> = page.items.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::UpdatedMetadata]);
}

#[test]
fn metadata_on_unknown_resources_is_an_error() {
    let archive = archive();
    let err = archive.set_metadata("missing", NOTES, "x", None).unwrap_err();
    assert!(matches!(err, Error::UnknownResource(_)));
}

// ============================================================================
// Attachment revisions
// ============================================================================

#[test]
fn attachments_follow_the_same_revision_scheme() {
    let archive = archive();
    let study = stored_study(&archive);

    let first = FileInfo::uncompressed(REPORT, 100, content_checksum(b"v1"));
    assert_eq!(archive.add_attachment(&first, &study, None).unwrap(), 0);

    // Replacement without precondition.
    let second = FileInfo::uncompressed(REPORT, 120, content_checksum(b"v2"));
    assert_eq!(archive.add_attachment(&second, &study, None).unwrap(), 1);

    // Stale checksum.
    let third = FileInfo::uncompressed(REPORT, 130, content_checksum(b"v3"));
    let err = archive
        .add_attachment(&third, &study, Some((1, &content_checksum(b"v1"))))
        .unwrap_err();
    assert!(matches!(err, Error::Revision(_)));

    // The checksum guarding the swap is the one of the stored payload.
    let revision = archive
        .add_attachment(&third, &study, Some((1, &content_checksum(b"v2"))))
        .unwrap();
    assert_eq!(revision, 2);

    let (info, revision) = archive.lookup_attachment(&study, REPORT).unwrap().unwrap();
    assert_eq!(info.uncompressed_size, 130);
    assert_eq!(revision, 2);
}

#[test]
fn user_attachments_emit_update_changes() {
    let archive = archive();
    let study = stored_study(&archive);
    let before = archive.get_changes(0, 100).unwrap().last;

    let report = FileInfo::uncompressed(REPORT, 100, content_checksum(b"v1"));
    archive.add_attachment(&report, &study, None).unwrap();

    // System attachments do not.
    let dicom = FileInfo::uncompressed(ContentType::DICOM_AS_JSON, 50, content_checksum(b"j"));
    archive.add_attachment(&dicom, &study, None).unwrap();

    let page = archive.get_changes(before, 100).unwrap();
    let kinds: Vec<ChangeKind> = page.items.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::UpdatedAttachment]);
}

#[test]
fn guarded_attachment_deletion() {
    let archive = archive();
    let study = stored_study(&archive);
    let report = FileInfo::uncompressed(REPORT, 100, content_checksum(b"v1"));
    archive.add_attachment(&report, &study, None).unwrap();

    let err = archive
        .delete_attachment(&study, REPORT, Some((0, "wrong")))
        .unwrap_err();
    assert!(matches!(err, Error::Revision(_)));

    let existed = archive
        .delete_attachment(&study, REPORT, Some((0, &content_checksum(b"v1"))))
        .unwrap();
    assert!(existed);
    assert!(!archive.delete_attachment(&study, REPORT, None).unwrap());
}

#[test]
fn attachment_sizes_feed_the_statistics() {
    let archive = archive();
    let study = stored_study(&archive);

    let report = FileInfo::uncompressed(REPORT, 100, content_checksum(b"v1"));
    archive.add_attachment(&report, &study, None).unwrap();

    let stats = archive.get_global_statistics().unwrap();
    assert_eq!(stats.disk_size, 100);
    assert_eq!(stats.uncompressed_size, 100);

    archive.delete_attachment(&study, REPORT, None).unwrap();
    assert_eq!(archive.get_global_statistics().unwrap().disk_size, 0);
}

// ============================================================================
// Attachment custom data
// ============================================================================

#[test]
fn custom_data_rides_on_the_attachment_uuid() {
    let archive = archive();
    let study = stored_study(&archive);
    let report = FileInfo::uncompressed(REPORT, 100, content_checksum(b"v1"));
    archive.add_attachment(&report, &study, None).unwrap();

    assert!(archive.get_attachment_custom_data(&report.uuid).unwrap().is_none());
    archive
        .set_attachment_custom_data(&report.uuid, b"range:0-99")
        .unwrap();
    assert_eq!(
        archive.get_attachment_custom_data(&report.uuid).unwrap().unwrap(),
        b"range:0-99"
    );
}
