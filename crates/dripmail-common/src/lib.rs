//! Dripmail Common - Shared types and utilities
//!
//! This crate provides configuration, the shared error type and the value
//! types passed between the storage, scheduling and API layers.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
