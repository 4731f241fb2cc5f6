//! Change and export log entries.
//!
//! Both logs are append-only sequences with strictly increasing indices
//! assigned by the backend; deletions purge resources but never renumber
//! surviving entries.

use crate::types::ResourceLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    NewPatient,
    NewStudy,
    NewSeries,
    NewInstance,
    /// A series reached its expected instance count.
    CompletedSeries,
    /// An ancestor gained a new instance somewhere in its subtree.
    NewChildInstance,
    Deleted,
    UpdatedMetadata,
    UpdatedAttachment,
}

impl ChangeKind {
    /// The `New*` kind announcing a creation at `level`.
    pub fn new_resource(level: ResourceLevel) -> ChangeKind {
        match level {
            ResourceLevel::Patient => ChangeKind::NewPatient,
            ResourceLevel::Study => ChangeKind::NewStudy,
            ResourceLevel::Series => ChangeKind::NewSeries,
            ResourceLevel::Instance => ChangeKind::NewInstance,
        }
    }
}

/// One entry of the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub seq: i64,
    pub kind: ChangeKind,
    pub level: ResourceLevel,
    pub public_id: String,
    pub date: DateTime<Utc>,
}

/// One entry of the export log: a resource sent to a remote modality,
/// together with the DICOM identifiers of its hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedRecord {
    pub seq: i64,
    pub level: ResourceLevel,
    pub public_id: String,
    pub remote_modality: String,
    pub date: DateTime<Utc>,
    pub patient_id: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

/// One page of a paginated log read.
///
/// `last` is always populated: the sequence of the final item, or the log's
/// current high-water mark when the page came back empty, so a caller can
/// keep its cursor moving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage<T> {
    pub items: Vec<T>,
    /// True when no further entries exist beyond this page.
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<i64>,
    pub last: i64,
}
