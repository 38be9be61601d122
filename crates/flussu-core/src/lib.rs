//! # Flussu Core
//!
//! Shared configuration and error types for the Flussu timed-call dispatcher.
//! The configuration is loaded once at process start and passed by reference
//! to every component that needs it.

pub mod config;
pub mod error;

pub use config::{FlussuConfig, TargetPolicy};
pub use error::{FlussuError, Result};
