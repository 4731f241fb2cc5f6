//! Attachment descriptors.
//!
//! The engine never touches attachment bytes; it stores and revises
//! [`FileInfo`] handles pointing into the external storage area.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Content type of an attachment. At most one attachment of a given content
/// type exists per resource. Values below 1024 are reserved for the engine;
/// user-defined types start at [`ContentType::USER_RANGE`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ContentType(pub i32);

impl ContentType {
    /// The raw DICOM file as received.
    pub const DICOM: ContentType = ContentType(1);
    /// Cached JSON rendition of the dataset.
    pub const DICOM_AS_JSON: ContentType = ContentType(2);
    /// The DICOM file truncated right before its pixel data.
    pub const DICOM_UNTIL_PIXEL_DATA: ContentType = ContentType(3);

    pub const USER_RANGE: i32 = 1024;

    pub fn is_user(self) -> bool {
        self.0 >= Self::USER_RANGE
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compression applied by the storage area before the blob was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    ZlibWithSize,
}

/// Handle to one stored blob: identity, sizes, checksums, compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub uuid: String,
    pub content_type: ContentType,
    pub uncompressed_size: u64,
    pub uncompressed_checksum: String,
    pub compression: CompressionType,
    pub compressed_size: u64,
    pub compressed_checksum: String,
}

impl FileInfo {
    /// Handle for a blob stored without compression; both size/checksum
    /// pairs coincide.
    pub fn uncompressed(
        content_type: ContentType,
        size: u64,
        checksum: impl Into<String>,
    ) -> FileInfo {
        let checksum = checksum.into();
        FileInfo {
            uuid: Uuid::new_v4().to_string(),
            content_type,
            uncompressed_size: size,
            uncompressed_checksum: checksum.clone(),
            compression: CompressionType::None,
            compressed_size: size,
            compressed_checksum: checksum,
        }
    }
}
