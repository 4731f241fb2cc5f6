//! # Archive Core
//!
//! Domain types and backend contract for the archive metadata engine:
//!
//! - **Resource model**: the four-level patient / study / series / instance
//!   hierarchy, public identifiers, statistics
//! - **Tags**: DICOM tag identifiers, per-level main-tag registry, signatures
//! - **Attachments & metadata**: revisioned binary blobs and typed entries
//! - **Changes**: the append-only change and export logs
//! - **Find**: structured query requests and hydrated responses
//! - **Contract**: the `Backend` / `BackendTransaction` traits every storage
//!   implementation must satisfy, with its `Capabilities` descriptor
//!
//! This crate holds no execution logic; the transaction and retry machinery
//! lives in `archive-engine`.

pub mod attachment;
pub mod changes;
pub mod contract;
pub mod error;
pub mod find;
pub mod hash;
pub mod metadata;
pub mod tags;
pub mod types;

pub use attachment::{CompressionType, ContentType, FileInfo};
pub use changes::{ChangeKind, ChangeRecord, ExportedRecord, LogPage};
pub use contract::{
    Backend, BackendTransaction, Capabilities, CreatedInstance, DeletionReport,
};
pub use error::{Error, Result};
pub use find::{
    ConstraintKind, FindRequest, FindResource, LabelsConstraint, Retrieve, TagConstraint,
};
pub use hash::ResourceHasher;
pub use metadata::MetadataType;
pub use tags::{Tag, TagSet};
pub use types::{
    GlobalProperty, GlobalStatistics, QueueOrigin, QuotaPolicy, RemainingAncestor,
    ResourceId, ResourceLevel, ResourceStatistics, SeriesStatus, StoreStatus,
    TransactionKind,
};
