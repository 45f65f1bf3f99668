//! Domain types shared by every matte crate.
//!
//! Holds the job model and its transition rules, the error taxonomy,
//! the retry policy used for storage and callback retries, and input
//! validation helpers. Has no internal dependencies.

pub mod error;
pub mod job;
pub mod retry;
pub mod types;
pub mod validation;
