//! instcat-refresh library
//!
//! Scheduled refresh pipeline for the institution catalog: fetches each
//! tracked institution's pages, extracts field candidates, scores and
//! validates them, and commits accepted values with a full audit trail.

pub mod catalog;
pub mod config;
pub mod db;
pub mod extractors;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use config::PipelineConfig;
pub use workflow::{PipelineServices, RefreshCoordinator};

/// Module name used for root folder resolution and the config file name
pub const MODULE_NAME: &str = "instcat-refresh";
