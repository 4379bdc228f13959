//! Image Lifecycle Selector
//!
//! Keeps per-environment build history of golden images, answers
//! "latest valid image" queries, and validates builds against a policy.

pub mod selector;
pub mod validation;

pub use golden_common::{Error, ImageRecord, ImageState, Result};
pub use selector::{Ingested, Selector};
pub use validation::{validate, validate_at, FailureReason, ValidationPolicy, ValidationResult};
