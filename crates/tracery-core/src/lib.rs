//! Core types and trait definitions for the tracery trace store.
//!
//! Everything that describes *what* is stored lives here: the entity models,
//! the tenant-scoped predicate builder, the [`RowStore`](store::RowStore)
//! contract a backend must satisfy, and the repositories, hierarchy assembler,
//! session aggregator and sweeper built on top of it.
//!
//! This crate has no database dependency. `tracery-store-sqlite` provides the
//! production backend.

pub mod error;
pub mod hierarchy;
pub mod model;
pub mod page;
pub mod predicate;
pub mod record;
pub mod repository;
pub mod row;
pub mod session;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
