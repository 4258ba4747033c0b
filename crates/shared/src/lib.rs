//! Shared types, errors, and configuration for Hearth.
//!
//! This crate provides common types used across all other crates:
//! - Money types with fixed minor-unit precision
//! - Typed IDs for type-safe entity references
//! - Application-wide error types
//! - Configuration management
//! - Tracing subscriber bootstrap for the binaries

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
