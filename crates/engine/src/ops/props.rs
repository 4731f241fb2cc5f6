//! Global properties, monotonic sequences, and the key-value / queue
//! primitives.

use crate::index::Index;
use archive_core::{Backend, Error, GlobalProperty, QueueOrigin, Result};
use tracing::error;

impl<B: Backend> Index<B> {
    pub fn lookup_global_property(
        &self,
        property: GlobalProperty,
        shared: bool,
    ) -> Result<Option<String>> {
        self.apply_read(|tx| tx.lookup_global_property(property, shared))
    }

    /// Value of a global property, or `default` when unset.
    pub fn get_global_property(
        &self,
        property: GlobalProperty,
        shared: bool,
        default: &str,
    ) -> Result<String> {
        Ok(self
            .lookup_global_property(property, shared)?
            .unwrap_or_else(|| default.to_owned()))
    }

    pub fn set_global_property(
        &self,
        property: GlobalProperty,
        shared: bool,
        value: &str,
    ) -> Result<()> {
        self.apply_write(|tx| tx.set_global_property(property, shared, value))
    }

    /// Draws the next value of a monotonic sequence stored as a global
    /// property. Uses the backend's atomic increment when available and a
    /// read-modify-write inside the transaction otherwise; a corrupted
    /// stored value restarts the sequence instead of failing.
    pub fn increment_global_sequence(
        &self,
        sequence: GlobalProperty,
        shared: bool,
    ) -> Result<u64> {
        if self.capabilities().atomic_increment {
            self.apply_write(|tx| {
                let value = tx.increment_global_property(sequence, shared, 1)?;
                Ok(value as u64)
            })
        } else {
            self.apply_write(|tx| {
                let new_value = match tx.as_read().lookup_global_property(sequence, shared)? {
                    Some(old) => match old.parse::<u64>() {
                        Ok(old_value) => old_value + 1,
                        Err(_) => {
                            error!("cannot read the global sequence {}, resetting it", sequence.0);
                            1
                        }
                    },
                    None => 1,
                };
                tx.set_global_property(sequence, shared, &new_value.to_string())?;
                Ok(new_value)
            })
        }
    }

    // -- key-value stores ---------------------------------------------------

    pub fn store_key_value(&self, store_id: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key_value_support(store_id)?;
        self.apply_write(|tx| tx.kv_store(store_id, key, value))
    }

    pub fn get_key_value(&self, store_id: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key_value_support(store_id)?;
        self.apply_read(|tx| tx.kv_get(store_id, key))
    }

    pub fn delete_key_value(&self, store_id: &str, key: &[u8]) -> Result<()> {
        self.check_key_value_support(store_id)?;
        self.apply_write(|tx| tx.kv_delete(store_id, key))
    }

    /// Cursor over a whole key-value store, fetching blocks of keys in
    /// ascending order, each block in its own read transaction.
    pub fn iterate_keys_values(&self, store_id: &str) -> Result<KeysValuesIterator<'_, B>> {
        self.check_key_value_support(store_id)?;
        Ok(KeysValuesIterator {
            index: self,
            store_id: store_id.to_owned(),
            limit: 100,
            state: IteratorState::Waiting,
            block: Vec::new(),
            position: 0,
        })
    }

    fn check_key_value_support(&self, store_id: &str) -> Result<()> {
        if !self.capabilities().key_value_stores {
            Err(Error::NotImplemented(
                "the backend has no support for key-value stores".into(),
            ))
        } else if store_id.is_empty() {
            Err(Error::ParameterOutOfRange("empty key-value store id".into()))
        } else {
            Ok(())
        }
    }

    // -- queues -------------------------------------------------------------

    pub fn enqueue_value(&self, queue_id: &str, value: &[u8]) -> Result<()> {
        self.check_queue_support(queue_id)?;
        self.apply_write(|tx| tx.queue_enqueue(queue_id, value))
    }

    pub fn dequeue_value(
        &self,
        queue_id: &str,
        origin: QueueOrigin,
    ) -> Result<Option<Vec<u8>>> {
        self.check_queue_support(queue_id)?;
        self.apply_write(|tx| tx.queue_dequeue(queue_id, origin))
    }

    pub fn get_queue_size(&self, queue_id: &str) -> Result<u64> {
        self.check_queue_support(queue_id)?;
        self.apply_read(|tx| tx.queue_size(queue_id))
    }

    fn check_queue_support(&self, queue_id: &str) -> Result<()> {
        if !self.capabilities().queues {
            Err(Error::NotImplemented(
                "the backend has no support for queues".into(),
            ))
        } else if queue_id.is_empty() {
            Err(Error::ParameterOutOfRange("empty queue id".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IteratorState {
    Waiting,
    Available,
    Done,
}

/// Block-wise cursor over a key-value store. Each block is read in its own
/// transaction, so the iteration is not a snapshot: keys written or removed
/// while iterating may or may not be observed.
pub struct KeysValuesIterator<'a, B: Backend> {
    index: &'a Index<B>,
    store_id: String,
    limit: u64,
    state: IteratorState,
    block: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
}

impl<B: Backend> KeysValuesIterator<'_, B> {
    /// Block size of the underlying fetches; 0 means unlimited.
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Advances to the next pair, fetching the next block when the current
    /// one is exhausted. Calling again after the end is a contract error.
    pub fn next(&mut self) -> Result<bool> {
        let from = match self.state {
            IteratorState::Done => {
                return Err(Error::BadSequenceOfCalls(
                    "iterating a key-value store past its end".into(),
                ));
            }
            IteratorState::Available => {
                self.position += 1;
                if self.position < self.block.len() {
                    return Ok(true);
                }
                match self.block.last() {
                    Some((key, _value)) => Some(key.clone()),
                    None => {
                        self.state = IteratorState::Done;
                        return Ok(false);
                    }
                }
            }
            IteratorState::Waiting => None,
        };

        let block = self.index.apply_read(|tx| {
            tx.kv_list(&self.store_id, from.as_deref(), self.limit)
        })?;

        if self.limit != 0 && block.len() as u64 > self.limit {
            return Err(Error::BackendPlugin(
                "the backend returned too many key-value pairs".into(),
            ));
        }

        self.block = block;
        self.position = 0;
        if self.block.is_empty() {
            self.state = IteratorState::Done;
            Ok(false)
        } else {
            self.state = IteratorState::Available;
            Ok(true)
        }
    }

    /// The pair under the cursor, once `next` has returned true.
    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        if self.state == IteratorState::Available {
            self.block
                .get(self.position)
                .map(|(key, value)| (key.as_slice(), value.as_slice()))
        } else {
            None
        }
    }
}
