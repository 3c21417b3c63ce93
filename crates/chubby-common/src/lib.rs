//! Chubby Common - Shared types and utilities
//!
//! This crate provides the error taxonomy and the configuration types
//! shared by the storage engine and the tools built on top of it.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
