//! Dripmail API - REST API server
//!
//! This crate provides the REST surface over sequences, campaigns and
//! campaign contacts, plus health and OpenAPI endpoints.

pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::create_openapi_routes;
pub use routes::create_router;
pub use state::AppState;
