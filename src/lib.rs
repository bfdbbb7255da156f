//! Persistent feed message store.
//!
//! [`storage::Database`] owns the SQLite schema and every query; the
//! [`reconcile`] module merges fetched batches into it without duplicating
//! messages or losing local read/important state.

pub mod config;
pub mod jobs;
pub mod reconcile;
pub mod storage;
