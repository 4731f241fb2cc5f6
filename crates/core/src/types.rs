//! Fundamental resource types: hierarchy levels, statuses, policies,
//! statistics, and global-property keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four ordered levels of the resource hierarchy.
///
/// `Patient < Study < Series < Instance`; every non-patient resource has
/// exactly one parent of the immediately higher level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceLevel {
    Patient,
    Study,
    Series,
    Instance,
}

impl ResourceLevel {
    /// Number of hops from the patient level (patient is 0).
    pub fn depth(self) -> u8 {
        match self {
            ResourceLevel::Patient => 0,
            ResourceLevel::Study => 1,
            ResourceLevel::Series => 2,
            ResourceLevel::Instance => 3,
        }
    }

    pub fn from_depth(depth: u8) -> Option<ResourceLevel> {
        match depth {
            0 => Some(ResourceLevel::Patient),
            1 => Some(ResourceLevel::Study),
            2 => Some(ResourceLevel::Series),
            3 => Some(ResourceLevel::Instance),
            _ => None,
        }
    }

    /// The immediately higher level, if any.
    pub fn parent(self) -> Option<ResourceLevel> {
        match self {
            ResourceLevel::Patient => None,
            ResourceLevel::Study => Some(ResourceLevel::Patient),
            ResourceLevel::Series => Some(ResourceLevel::Study),
            ResourceLevel::Instance => Some(ResourceLevel::Series),
        }
    }

    /// The immediately lower level, if any.
    pub fn child(self) -> Option<ResourceLevel> {
        match self {
            ResourceLevel::Patient => Some(ResourceLevel::Study),
            ResourceLevel::Study => Some(ResourceLevel::Series),
            ResourceLevel::Series => Some(ResourceLevel::Instance),
            ResourceLevel::Instance => None,
        }
    }

    pub fn all() -> [ResourceLevel; 4] {
        [
            ResourceLevel::Patient,
            ResourceLevel::Study,
            ResourceLevel::Series,
            ResourceLevel::Instance,
        ]
    }
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceLevel::Patient => "Patient",
            ResourceLevel::Study => "Study",
            ResourceLevel::Series => "Series",
            ResourceLevel::Instance => "Instance",
        };
        f.write_str(s)
    }
}

/// Opaque backend-assigned internal id of a resource. Never stable across
/// backends; external callers address resources by public id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreStatus {
    /// The instance was stored (possibly after an overwrite).
    Success,
    /// The instance already existed and overwrite was not requested.
    AlreadyStored,
    /// Storage-quota ceiling could not be satisfied.
    StorageFull,
    /// The backend rejected the store for another reason.
    Failure,
}

/// Completeness of a series with respect to its expected instance count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesStatus {
    /// Every expected index is present exactly once.
    Complete,
    /// Some expected indices are still missing.
    Missing,
    /// Duplicate or out-of-range indices were found.
    Inconsistent,
    /// No expected count is recorded, or an index could not be parsed.
    Unknown,
}

/// What to do when a store would exceed the configured quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaPolicy {
    /// Refuse the store with a storage-full error.
    Reject,
    /// Evict least-recently-used patients until the store fits.
    Recycle,
}

/// Which end of a queue `dequeue` pops from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueOrigin {
    Front,
    Back,
}

/// Isolation kind requested from the backend when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    ReadOnly,
    ReadWrite,
}

/// Aggregate sizes and resource counts for the whole archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    pub disk_size: u64,
    pub uncompressed_size: u64,
    pub patients: u64,
    pub studies: u64,
    pub series: u64,
    pub instances: u64,
}

/// Subtree statistics for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatistics {
    pub studies: u64,
    pub series: u64,
    pub instances: u64,
    pub disk_size: u64,
    pub uncompressed_size: u64,
    /// Sizes restricted to the main imaging attachment.
    pub dicom_disk_size: u64,
    pub dicom_uncompressed_size: u64,
}

/// Ancestor closest to the patient level that survives a cascading delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingAncestor {
    pub level: ResourceLevel,
    pub public_id: String,
}

/// Well-known key of a singleton global property. Values below 1024 are
/// reserved for the engine; user properties live at 1024 and above.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GlobalProperty(pub i32);

impl GlobalProperty {
    pub const SCHEMA_VERSION: GlobalProperty = GlobalProperty(1);
    pub const ANONYMIZATION_SEQUENCE: GlobalProperty = GlobalProperty(3);

    pub fn is_user(self) -> bool {
        self.0 >= 1024
    }
}

/// Labels are restricted to a conservative alphabet so they can travel
/// through query strings and database indexes unescaped.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 64
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
