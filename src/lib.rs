//! Library crate for trial-scoring-back, exposing modules for binaries and integration tests.

/// Runtime configuration.
pub mod config;
/// Storage models and backends.
pub mod dao;
/// REST and SSE payloads.
pub mod dto;
/// Service and HTTP errors.
pub mod error;
/// HTTP routers.
pub mod routes;
/// Business operations.
pub mod services;
/// Shared application state.
pub mod state;
