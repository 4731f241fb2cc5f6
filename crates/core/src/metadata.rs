//! Typed metadata keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of a metadata entry on a resource. Values below 1024 are reserved
/// for the engine (signatures, reception info, transfer syntax); user
/// metadata starts at [`MetadataType::USER_RANGE`]. Only user entries and a
/// small set of system entries participate in change-log signaling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MetadataType(pub i32);

impl MetadataType {
    pub const INDEX_IN_SERIES: MetadataType = MetadataType(1);
    pub const RECEPTION_DATE: MetadataType = MetadataType(2);
    pub const REMOTE_AET: MetadataType = MetadataType(3);
    pub const EXPECTED_INSTANCES: MetadataType = MetadataType(4);
    pub const LAST_UPDATE: MetadataType = MetadataType(7);
    pub const ORIGIN: MetadataType = MetadataType(8);
    pub const TRANSFER_SYNTAX: MetadataType = MetadataType(9);
    pub const SOP_CLASS_UID: MetadataType = MetadataType(10);
    pub const REMOTE_IP: MetadataType = MetadataType(11);
    pub const CALLED_AET: MetadataType = MetadataType(12);
    pub const HTTP_USERNAME: MetadataType = MetadataType(13);
    pub const PIXEL_DATA_OFFSET: MetadataType = MetadataType(14);
    pub const MAIN_TAGS_SIGNATURE: MetadataType = MetadataType(15);
    pub const MAIN_SEQUENCES: MetadataType = MetadataType(16);
    pub const PIXEL_DATA_VR: MetadataType = MetadataType(17);

    pub const USER_RANGE: i32 = 1024;

    /// User metadata triggers an `UpdatedMetadata` change when written
    /// through the public mutation path; system metadata does not.
    pub fn is_user(self) -> bool {
        self.0 >= Self::USER_RANGE
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
