//! Engine Integration Tests
//!
//! Exercises the public operations end to end against the in-memory
//! backend, including the compatibility paths taken when a backend
//! advertises fewer capabilities.

mod common;

mod labels;
mod primitives;
mod recycling;
mod revisions;
mod store;
