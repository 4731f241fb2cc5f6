//! Convenient imports.
//!
//! Re-exports the types most operations need:
//!
//! ```ignore
//! use archivedb::prelude::*;
//!
//! let archive = Archive::in_memory()?;
//! ```

// Main entry point
pub use crate::database::{Archive, ArchiveBuilder};

// Error handling
pub use archive_core::{Error, Result};

// Resource model
pub use archive_core::{
    ContentType, FileInfo, MetadataType, ResourceLevel, StoreStatus, TagSet,
};
pub use archive_core::tags;

// Store pipeline
pub use archive_engine::{RequestOrigin, StoreOrigin, StoreRequest, StoreResult};

// Queries
pub use archive_core::{FindRequest, FindResource, Retrieve};

// Change log
pub use archive_core::{ChangeKind, ChangeRecord, LogPage};

// Quotas
pub use archive_core::QuotaPolicy;
pub use archive_engine::QuotaConfig;
