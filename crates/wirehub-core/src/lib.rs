//! # wirehub-core
//!
//! Core crate for wirehub. Contains the configuration schemas loaded at
//! startup and the unified error type used at the application boundary.
//!
//! This crate has **no** internal dependencies on other wirehub crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
