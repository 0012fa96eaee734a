//! Persisted record types.

pub mod job_record;
