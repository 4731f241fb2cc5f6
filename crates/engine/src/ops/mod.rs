//! Public operations of the index, grouped by concern. Each submodule adds
//! an `impl` block on [`crate::Index`]; every operation is one retried
//! transaction.

pub mod changes;
pub mod find;
pub mod metadata;
pub mod props;
pub mod resources;
pub mod store;
