//! Dripmail Storage - Database abstraction
//!
//! This crate provides the sequence, campaign and contact repositories,
//! backed by PostgreSQL or by a process-local in-memory store.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
