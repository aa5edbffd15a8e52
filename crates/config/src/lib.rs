//! Configuration module for the stave transcoding daemon
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
