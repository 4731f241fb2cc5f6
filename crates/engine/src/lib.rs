//! # Archive Engine
//!
//! Transactional orchestration over any [`archive_core::Backend`]:
//!
//! - **Retry engine** ([`Index`]): wraps every access in an atomic unit of
//!   work and transparently retries serialization conflicts with
//!   randomized backoff
//! - **Transaction views**: typed read-only / read-write facades over the
//!   backend primitives
//! - **Operations**: the store algorithm, cascading deletion, recycling,
//!   revisioned metadata/attachments, change and export logs, labels,
//!   global properties, key-value stores, queues, and find/count
//!
//! The engine is synchronous; concurrency comes from independent callers
//! invoking it from their own threads.

pub mod config;
pub mod context;
pub mod index;
pub mod ops;
pub mod transaction;

pub use config::{EngineConfig, QuotaConfig};
pub use context::{
    BasicContext, BasicContextFactory, CommitListener, TransactionContext,
    TransactionContextFactory,
};
pub use index::Index;
pub use ops::props::KeysValuesIterator;
pub use ops::store::{RequestOrigin, StoreOrigin, StoreRequest, StoreResult};
pub use transaction::{ReadTransaction, Transaction, TransactionState, WriteTransaction};
