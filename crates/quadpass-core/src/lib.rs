//! quadpass Core
//!
//! Shared utilities for the quadpass crates: logging setup, profiling scopes
//! and the hash collections used by every cache.

pub mod collections;
pub mod logging;
pub mod profiling;
