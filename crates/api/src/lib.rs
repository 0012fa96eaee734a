//! HTTP adapter for the image generation job service.
//!
//! Exposes config, state, error handling, uploads, and routes so the binary
//! and the integration tests build the same application.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod uploads;
