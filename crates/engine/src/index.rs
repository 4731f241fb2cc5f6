//! The retry engine.
//!
//! [`Index`] is the single entry point every public operation funnels
//! through: it opens a fresh context and backend transaction per attempt,
//! runs the caller's closure against the typed view, commits, and
//! transparently retries serialization conflicts with linear backoff plus
//! jitter. Any other error aborts immediately and the dropped transaction
//! rolls back.

use crate::config::{EngineConfig, QuotaConfig};
use crate::context::{TransactionContext, TransactionContextFactory};
use crate::transaction::{ReadTransaction, Transaction, WriteTransaction};
use archive_core::{Backend, Capabilities, Error, QuotaPolicy, Result, TransactionKind};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Transactional index over one storage backend.
///
/// The two cross-transaction knobs (context factory, retry bound) sit
/// behind a reader-biased lock and an atomic: they are read on every apply
/// and written rarely.
pub struct Index<B: Backend> {
    backend: B,
    capabilities: Capabilities,
    read_only: bool,
    factory: RwLock<Option<Box<dyn TransactionContextFactory>>>,
    max_retries: AtomicU32,
    overwrite_instances: AtomicBool,
    quota: RwLock<QuotaConfig>,
}

impl<B: Backend> Index<B> {
    pub fn new(backend: B, config: EngineConfig) -> Index<B> {
        let capabilities = backend.capabilities();
        Index {
            backend,
            capabilities,
            read_only: config.read_only,
            factory: RwLock::new(None),
            max_retries: AtomicU32::new(config.max_retries),
            overwrite_instances: AtomicBool::new(config.overwrite_instances),
            quota: RwLock::new(config.quota),
        }
    }

    /// Installs the transaction-context factory. Must happen exactly once,
    /// before the first apply.
    pub fn set_context_factory(&self, factory: Box<dyn TransactionContextFactory>) -> Result<()> {
        let mut slot = self.factory.write();
        if slot.is_some() {
            return Err(Error::BadSequenceOfCalls(
                "the transaction context factory is already installed".into(),
            ));
        }
        *slot = Some(factory);
        Ok(())
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.max_retries.store(max_retries, Ordering::Relaxed);
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn overwrite_instances(&self) -> bool {
        self.overwrite_instances.load(Ordering::Relaxed)
    }

    pub fn set_overwrite_instances(&self, overwrite: bool) {
        self.overwrite_instances.store(overwrite, Ordering::Relaxed);
    }

    pub fn quota(&self) -> QuotaConfig {
        *self.quota.read()
    }

    /// Replaces the quota settings. Callers shrinking the limits usually
    /// follow up with [`Index::standalone_recycling`].
    pub fn set_quota(&self, quota: QuotaConfig) {
        *self.quota.write() = quota;
    }

    /// Durability barrier on the backend, outside any transaction.
    pub fn flush_to_disk(&self) -> Result<()> {
        self.backend.flush_to_disk()
    }

    /// Runs a read-only unit of work with conflict retry.
    pub fn apply_read<T>(
        &self,
        operation: impl Fn(&ReadTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.apply_internal(TransactionKind::ReadOnly, |tx| {
            let view = tx.read_view();
            operation(&view)
        })
    }

    /// Runs a read-write unit of work with conflict retry. Fails with
    /// `Error::ReadOnly` on a read-only engine, before any transaction is
    /// opened.
    pub fn apply_write<T>(
        &self,
        operation: impl Fn(&mut WriteTransaction<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        self.apply_internal(TransactionKind::ReadWrite, |tx| {
            let mut view = tx.write_view();
            operation(&mut view)
        })
    }

    /// Proactive eviction pass, run at startup or after a quota change.
    /// Only meaningful under the recycle policy with at least one limit.
    pub fn standalone_recycling(&self) -> Result<()> {
        let quota = self.quota();
        if quota.policy == QuotaPolicy::Recycle && !quota.is_unlimited() {
            info!("running standalone recycling");
            self.apply_write(|tx| {
                tx.recycle(quota.max_storage_bytes, quota.max_patient_count, 0, None)
            })
        } else {
            Ok(())
        }
    }

    fn create_context(&self) -> Result<Box<dyn TransactionContext>> {
        match &*self.factory.read() {
            Some(factory) => Ok(factory.create()),
            None => Err(Error::BadSequenceOfCalls(
                "no transaction context factory installed".into(),
            )),
        }
    }

    fn apply_internal<T>(
        &self,
        kind: TransactionKind,
        operation: impl Fn(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        if kind == TransactionKind::ReadWrite && self.read_only {
            return Err(Error::ReadOnly);
        }

        let max_retries = self.max_retries.load(Ordering::Relaxed);
        let mut attempt = 0u32;

        loop {
            let context = self.create_context()?;
            let backend_tx = self.backend.start_transaction(kind)?;
            let mut tx = Transaction::new(backend_tx, context, kind);

            let outcome = operation(&mut tx).and_then(|value| {
                tx.commit()?;
                Ok(value)
            });

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    drop(tx);
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(err);
                    }
                    let jitter = rand::thread_rng().gen_range(0..50u64);
                    let delay = Duration::from_millis(100 * u64::from(attempt) + jitter);
                    debug!(
                        "serialization conflict, retrying in {}ms (attempt {attempt}/{max_retries})",
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
