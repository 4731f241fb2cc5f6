//! Engine configuration.

use archive_core::QuotaPolicy;
use serde::{Deserialize, Serialize};

/// Storage-quota settings, re-read at every admission decision so they can
/// be changed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Ceiling on the total compressed size, in bytes. 0 means no limit.
    pub max_storage_bytes: u64,
    /// Ceiling on the number of patients. 0 means no limit.
    pub max_patient_count: u64,
    pub policy: QuotaPolicy,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            max_storage_bytes: 0,
            max_patient_count: 0,
            policy: QuotaPolicy::Recycle,
        }
    }
}

impl QuotaConfig {
    pub fn is_unlimited(&self) -> bool {
        self.max_storage_bytes == 0 && self.max_patient_count == 0
    }
}

/// Construction-time configuration of an [`crate::Index`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reject every read-write operation with `Error::ReadOnly`.
    pub read_only: bool,
    /// Upper bound on attempts for serialization conflicts. Mutable after
    /// construction through `Index::set_max_retries`.
    pub max_retries: u32,
    /// Replace an already-stored instance instead of answering
    /// `AlreadyStored`.
    pub overwrite_instances: bool,
    pub quota: QuotaConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            read_only: false,
            max_retries: 10,
            overwrite_instances: false,
            quota: QuotaConfig::default(),
        }
    }
}
