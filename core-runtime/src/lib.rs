//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the dataset sync core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus and callback listener registry
//!
//! ## Overview
//!
//! Every other `core-*` crate depends on this one for its configuration
//! types, its logging conventions and the broadcast channel that reports
//! catalog, network and sync activity to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
