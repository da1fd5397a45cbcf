//! # wshub-core
//!
//! Core crate for wshub. Contains configuration schemas, the session
//! identifier type, and the unified error system.
//!
//! This crate has **no** internal dependencies on other wshub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
