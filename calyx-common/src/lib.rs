//! # Calyx Common Library
//!
//! Shared code for the Calyx flower identification service:
//! - Database initialization and schema
//! - Domain models (species, traits, identification cache, feedback)
//! - Configuration loading and root folder resolution
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod hash;

pub use error::{Error, Result};
