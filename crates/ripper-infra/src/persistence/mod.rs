//! Crash-safe job persistence

pub mod job_store;

pub use job_store::{FileJobStore, JobRepository};
