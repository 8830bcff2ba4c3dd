//! SQLite backend for the tracery row store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every table is append-only; a
//! `<table>_latest` view resolves the live version of each `(project_id, id)`
//! and all reads go through it.

mod encode;
mod query;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{SqliteStore, StoreOptions};
