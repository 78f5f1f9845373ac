//! Configuration module for ManageHD
//!
//! Handles the persisted settings file (directories and throughput estimate keyed by
//! host platform), worker/transcoder options, and environment variable overrides.

pub mod config;

pub use config::*;
