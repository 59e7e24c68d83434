//! Core domain for the content skeleton ripper.
//!
//! Holds the types shared by every stage of the pipeline (requests, source
//! items, extraction records, aggregated views, job records), the error
//! taxonomy, configuration loading, and the traits that external
//! collaborators implement.

pub mod analysis;
pub mod config;
pub mod error;
pub mod job;
pub mod skeleton;
pub mod traits;
pub mod types;

pub use analysis::*;
pub use config::*;
pub use error::*;
pub use job::*;
pub use skeleton::*;
pub use traits::*;
pub use types::*;
