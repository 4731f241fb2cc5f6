//! Label Tests
//!
//! Attaching and removing labels, validity rules, and label-driven
//! filtering in find requests.

use crate::common::*;
use archivedb::core::LabelsConstraint;
use archivedb::prelude::*;
use archivedb::{Archive, Capabilities};

fn stored_study(archive: &Archive) -> String {
    store(archive, dataset("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5")).study_public_id
}

#[test]
fn labels_round_trip() {
    let archive = archive();
    let study = stored_study(&archive);

    archive.add_label(&study, ResourceLevel::Study, "urgent").unwrap();
    archive.add_label(&study, ResourceLevel::Study, "qa_42").unwrap();
    // Adding twice is idempotent.
    archive.add_label(&study, ResourceLevel::Study, "urgent").unwrap();

    let labels = archive.list_labels(&study).unwrap();
    assert_eq!(labels.len(), 2);
    assert!(labels.contains("urgent"));

    archive.remove_label(&study, ResourceLevel::Study, "urgent").unwrap();
    assert!(!archive.list_labels(&study).unwrap().contains("urgent"));
}

#[test]
fn all_labels_aggregates_across_resources() {
    let archive = archive();
    let first = store(&archive, nth_dataset("P1", 1));
    let second = store(&archive, nth_dataset("P2", 1));
    archive
        .add_label(&first.study_public_id, ResourceLevel::Study, "teaching")
        .unwrap();
    let batch: std::collections::BTreeSet<String> = ["qa".to_owned()].into();
    archive
        .add_labels(&second.series_public_id, ResourceLevel::Series, &batch)
        .unwrap();

    let all = archive.list_all_labels().unwrap();
    assert!(all.contains("teaching"));
    assert!(all.contains("qa"));
}

#[test]
fn malformed_labels_are_rejected() {
    let archive = archive();
    let study = stored_study(&archive);

    for label in ["", "white space", "éclair", &"x".repeat(65)] {
        let err = archive
            .add_label(&study, ResourceLevel::Study, label)
            .unwrap_err();
        assert!(matches!(err, Error::ParameterOutOfRange(_)), "label {label:?}");
    }
}

#[test]
fn the_level_acts_as_a_guard() {
    let archive = archive();
    let study = stored_study(&archive);
    let err = archive
        .add_label(&study, ResourceLevel::Series, "urgent")
        .unwrap_err();
    assert!(matches!(err, Error::UnknownResource(_)));
}

#[test]
fn labels_require_backend_support() {
    let archive = Archive::builder()
        .capabilities(Capabilities {
            labels: false,
            ..Capabilities::all()
        })
        .build()
        .unwrap();
    let study = stored_study(&archive);
    let err = archive
        .add_label(&study, ResourceLevel::Study, "urgent")
        .unwrap_err();
    assert!(matches!(err, Error::NotImplemented(_)));
}

// ============================================================================
// Label-driven find
// ============================================================================

fn labelled_archive() -> (Archive, String, String, String) {
    let archive = archive();
    let a = store(&archive, nth_dataset("P1", 1)).study_public_id;
    let b = store(&archive, nth_dataset("P2", 1)).study_public_id;
    let c = store(&archive, nth_dataset("P3", 1)).study_public_id;
    archive.add_label(&a, ResourceLevel::Study, "urgent").unwrap();
    archive.add_label(&a, ResourceLevel::Study, "teaching").unwrap();
    archive.add_label(&b, ResourceLevel::Study, "urgent").unwrap();
    (archive, a, b, c)
}

fn find_studies(archive: &Archive, labels: &[&str], constraint: LabelsConstraint) -> Vec<String> {
    let mut request = FindRequest::new(ResourceLevel::Study);
    request.labels = labels.iter().map(|l| l.to_string()).collect();
    request.labels_constraint = constraint;
    archive
        .execute_find(&request)
        .unwrap()
        .into_iter()
        .map(|r| r.public_id)
        .collect()
}

#[test]
fn find_filters_on_all_any_and_none() {
    let (archive, a, b, c) = labelled_archive();

    let all = find_studies(&archive, &["urgent", "teaching"], LabelsConstraint::All);
    assert_eq!(all, vec![a.clone()]);

    let any = find_studies(&archive, &["urgent", "teaching"], LabelsConstraint::Any);
    assert_eq!(any.len(), 2);
    assert!(any.contains(&a) && any.contains(&b));

    let none = find_studies(&archive, &["urgent"], LabelsConstraint::None);
    assert_eq!(none, vec![c]);
}

#[test]
fn retrieved_labels_ride_on_find_results() {
    let (archive, a, _, _) = labelled_archive();
    let mut request = FindRequest::new(ResourceLevel::Study)
        .with_identifier(ResourceLevel::Study, a.as_str());
    request.retrieve.labels = true;

    let resource = archive
        .execute_single_resource(&a, ResourceLevel::Study, request.retrieve)
        .unwrap();
    assert!(resource.labels.contains("urgent"));
    assert!(resource.labels.contains("teaching"));
}
