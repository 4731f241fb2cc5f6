//! # Archive Memory
//!
//! A fully in-memory [`Backend`] for the archive engine. It keeps the whole
//! index in process memory behind a reader/writer lock and serializes write
//! transactions with a mutex, so a transaction never observes a serialization
//! conflict. Intended for tests and for ephemeral indexes rebuilt on startup.
//!
//! Writes are staged on a copy of the tables and swapped in at commit;
//! dropping the transaction without committing discards the copy, which gives
//! the same rollback-on-failure behavior as the SQL backends.

mod find;
mod tables;
mod txn;

use archive_core::contract::{Backend, BackendTransaction, Capabilities};
use archive_core::{Result, TransactionKind};
use parking_lot::{Mutex, RwLock};
use tables::Tables;
use txn::{MemoryTransaction, Mode};

pub struct MemoryBackend {
    tables: RwLock<Tables>,
    writer: Mutex<()>,
    capabilities: Capabilities,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend {
            tables: RwLock::new(Tables::default()),
            writer: Mutex::new(()),
            capabilities: Capabilities::all(),
        }
    }

    /// Same backend advertising only `capabilities`; the engine then follows
    /// its fallback paths, which is how the compatibility code is tested.
    pub fn with_capabilities(capabilities: Capabilities) -> MemoryBackend {
        MemoryBackend {
            capabilities,
            ..MemoryBackend::new()
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> MemoryBackend {
        MemoryBackend::new()
    }
}

impl Backend for MemoryBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn start_transaction<'a>(
        &'a self,
        kind: TransactionKind,
    ) -> Result<Box<dyn BackendTransaction + 'a>> {
        let mode = match kind {
            TransactionKind::ReadOnly => Mode::Read(self.tables.read()),
            TransactionKind::ReadWrite => {
                let writer = self.writer.lock();
                let staged = self.tables.read().clone();
                Mode::Write {
                    _writer: writer,
                    shared: &self.tables,
                    staged,
                }
            }
        };
        Ok(Box::new(MemoryTransaction::new(mode)))
    }
}
