//! Shared handler state

use dripmail_core::DripEngine;
use dripmail_storage::repository::Repositories;
use std::sync::Arc;

/// Application state shared by all handlers
pub struct AppState {
    pub repos: Repositories,
    pub engine: Arc<DripEngine>,
}

impl AppState {
    pub fn new(repos: Repositories, engine: Arc<DripEngine>) -> Arc<Self> {
        Arc::new(Self { repos, engine })
    }
}
