//! # instcat Common Library
//!
//! Shared code for the institution catalog services including:
//! - Error types
//! - Bootstrap configuration (root folder, TOML, logging)
//! - Database initialization and schema
//! - Pipeline event types (PipelineEvent enum) and the event bus
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
