//! # ArchiveDB
//!
//! Transactional metadata engine for a medical-image archive.
//!
//! ArchiveDB indexes DICOM instances into the patient / study / series /
//! instance hierarchy and tracks everything around them: main tags,
//! revisioned metadata and attachments, the change and export logs, labels,
//! storage quotas with patient recycling, and structured find queries.
//! Attachment bytes themselves live in an external storage area; the engine
//! only stores their handles.
//!
//! ## Quick Start
//!
//! ```ignore
//! use archivedb::prelude::*;
//!
//! let archive = Archive::in_memory()?;
//!
//! // Index one received instance
//! let mut dataset = TagSet::new();
//! dataset.set(tags::PATIENT_ID, "P-001");
//! dataset.set(tags::STUDY_INSTANCE_UID, "1.2.3");
//! dataset.set(tags::SERIES_INSTANCE_UID, "1.2.3.4");
//! dataset.set(tags::SOP_INSTANCE_UID, "1.2.3.4.5");
//! let stored = archive.store_instance(&StoreRequest::new(dataset))?;
//!
//! // Poll the change log
//! let page = archive.get_changes(0, 100)?;
//!
//! // Query
//! let request = FindRequest::new(ResourceLevel::Study);
//! let studies = archive.execute_find(&request)?;
//! ```
//!
//! ## Crates
//!
//! - [`archive_core`] - domain types and the [`Backend`] contract
//! - [`archive_engine`] - the retry engine and every operation
//! - [`archive_memory`] - the in-memory backend wired up by [`Archive`]
//!
//! [`Backend`]: archive_core::Backend

mod database;

pub mod prelude;

// Re-export main entry points
pub use database::{Archive, ArchiveBuilder};

// Re-export the layers for callers bringing their own backend
pub use archive_core as core;
pub use archive_engine as engine;
pub use archive_memory::MemoryBackend;

// Error handling
pub use archive_core::{Error, Result};

// Common domain types
pub use archive_core::{
    Capabilities, ChangeKind, ChangeRecord, ContentType, ExportedRecord, FileInfo,
    FindRequest, FindResource, LogPage, MetadataType, QuotaPolicy, ResourceLevel,
    Retrieve, StoreStatus, TagSet,
};
pub use archive_core::tags;
pub use archive_engine::{
    EngineConfig, Index, QuotaConfig, RequestOrigin, StoreOrigin, StoreRequest,
    StoreResult,
};
