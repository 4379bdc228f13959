//! Golden image control
//!
//! Reports finished Packer builds to the Image Registry and answers
//! deployment-side queries against it.

pub mod client;
pub mod register;

pub use client::{Registration, RegistryClient};
pub use register::{build_report, parse_tag, BuildReport, RegisterOptions};
