//! Main entry point.
//!
//! This module provides the `Archive` struct, an engine wired to the
//! in-memory backend. Servers embedding a SQL backend instantiate
//! [`archive_engine::Index`] directly instead.

use archive_core::contract::Capabilities;
use archive_core::Result;
use archive_engine::{
    BasicContextFactory, CommitListener, EngineConfig, Index, QuotaConfig,
};
use archive_memory::MemoryBackend;
use std::ops::Deref;
use std::sync::Arc;

/// An in-memory archive index.
///
/// Dereferences to [`Index`], so every engine operation is available
/// directly on the handle.
///
/// # Example
///
/// ```ignore
/// use archivedb::prelude::*;
///
/// let archive = Archive::in_memory()?;
///
/// let mut dataset = TagSet::new();
/// dataset.set(tags::PATIENT_ID, "P-001");
/// dataset.set(tags::STUDY_INSTANCE_UID, "1.2.3");
/// dataset.set(tags::SERIES_INSTANCE_UID, "1.2.3.4");
/// dataset.set(tags::SOP_INSTANCE_UID, "1.2.3.4.5");
/// let result = archive.store_instance(&StoreRequest::new(dataset))?;
/// assert_eq!(result.status, StoreStatus::Success);
/// ```
pub struct Archive {
    inner: Index<MemoryBackend>,
}

impl Archive {
    /// An archive with default settings: read-write, unlimited quotas,
    /// duplicate instances answered with `AlreadyStored`.
    pub fn in_memory() -> Result<Archive> {
        Archive::builder().build()
    }

    pub fn builder() -> ArchiveBuilder {
        ArchiveBuilder::new()
    }

    pub fn index(&self) -> &Index<MemoryBackend> {
        &self.inner
    }
}

impl Deref for Archive {
    type Target = Index<MemoryBackend>;

    fn deref(&self) -> &Index<MemoryBackend> {
        &self.inner
    }
}

/// Builder for archive configuration.
///
/// # Example
///
/// ```ignore
/// let archive = Archive::builder()
///     .quota(QuotaConfig {
///         max_storage_bytes: 10 * 1024 * 1024,
///         max_patient_count: 0,
///         policy: QuotaPolicy::Recycle,
///     })
///     .build()?;
/// ```
pub struct ArchiveBuilder {
    config: EngineConfig,
    capabilities: Option<Capabilities>,
    listener: Option<Arc<dyn CommitListener>>,
}

impl ArchiveBuilder {
    pub fn new() -> ArchiveBuilder {
        ArchiveBuilder {
            config: EngineConfig::default(),
            capabilities: None,
            listener: None,
        }
    }

    /// Reject every read-write access with `Error::ReadOnly`.
    pub fn read_only(mut self) -> Self {
        self.config.read_only = true;
        self
    }

    /// Attempts per unit of work before a serialization conflict is
    /// reported to the caller.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Whether storing an already-known instance replaces it or reports
    /// `StoreStatus::AlreadyStored` (the default).
    pub fn overwrite_instances(mut self, overwrite: bool) -> Self {
        self.config.overwrite_instances = overwrite;
        self
    }

    pub fn quota(mut self, quota: QuotaConfig) -> Self {
        self.config.quota = quota;
        self
    }

    /// Advertise only `capabilities`, forcing the engine onto its
    /// compatibility paths. Meant for tests.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Receives committed side effects: change notifications, removable
    /// blobs, stability windows.
    pub fn listener(mut self, listener: Arc<dyn CommitListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<Archive> {
        let backend = match self.capabilities {
            Some(capabilities) => MemoryBackend::with_capabilities(capabilities),
            None => MemoryBackend::new(),
        };
        let factory = match self.listener {
            Some(listener) => BasicContextFactory::with_listener(listener),
            None => BasicContextFactory::new(),
        };
        let index = Index::new(backend, self.config);
        index.set_context_factory(Box::new(factory))?;
        Ok(Archive { inner: index })
    }
}

impl Default for ArchiveBuilder {
    fn default() -> ArchiveBuilder {
        ArchiveBuilder::new()
    }
}
