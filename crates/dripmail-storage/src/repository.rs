//! Repository layer for data access

pub mod campaigns;
pub mod contacts;
pub mod sequences;

pub use campaigns::{CampaignRepository, DbCampaignRepository};
pub use contacts::{ContactRepository, DbContactRepository};
pub use sequences::{DbSequenceRepository, SequenceRepository};

use crate::db::DatabasePool;
use crate::memory::MemoryStore;
use dripmail_common::config::DatabaseConfig;
use dripmail_common::{Error, Result};
use std::sync::Arc;

/// The repositories used by the engine and the API, behind trait objects
#[derive(Clone)]
pub struct Repositories {
    pub sequences: Arc<dyn SequenceRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pool: Option<DatabasePool>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            sequences: Arc::new(DbSequenceRepository::new(pool.clone())),
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            contacts: Arc::new(DbContactRepository::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// Process-local repositories sharing one in-memory store
    pub fn memory(store: MemoryStore) -> Self {
        Self {
            sequences: Arc::new(store.clone()),
            campaigns: Arc::new(store.clone()),
            contacts: Arc::new(store),
            pool: None,
        }
    }

    /// Open the backend named in the configuration, running migrations for
    /// PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        match config.backend.as_str() {
            "postgres" => {
                let pool = DatabasePool::new(config).await?;
                pool.migrate().await?;
                Ok(Self::postgres(pool))
            }
            "memory" => Ok(Self::memory(MemoryStore::new())),
            other => Err(Error::Config(format!(
                "Unsupported database backend: {}",
                other
            ))),
        }
    }

    /// Check that the backend is reachable
    pub async fn health_check(&self) -> Result<()> {
        match &self.pool {
            Some(pool) => pool.health_check().await,
            None => Ok(()),
        }
    }
}
