//! Domain logic for the image generation job service.
//!
//! Everything here is free of database access: job identity and status
//! types, request fingerprinting, generation parameters, the stderr
//! progress decoder, and the external process runner.

pub mod error;
pub mod generation;
pub mod hashing;
pub mod job;
pub mod progress;
pub mod runner;
pub mod types;
