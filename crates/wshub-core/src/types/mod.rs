//! Core type definitions used across the wshub workspace.

pub mod id;

pub use id::SessionId;
