//! Database access for pipeline tables not owned by a single service
//!
//! Schema creation lives in `instcat_common::db::init`.

pub mod diagnostics;
pub mod runs;
pub mod sources;
pub mod statistics;
