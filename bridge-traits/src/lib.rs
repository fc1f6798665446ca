//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host must implement before the
//! dataset catalog and its sync engine can run.
//!
//! ## Overview
//!
//! This crate defines the contract between the core crates and the host. Each
//! trait is a capability the core needs but that is provided differently on
//! desktop, mobile or web.
//!
//! ## Traits
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable namespaced key-value records
//!   with transactional multi-key writes
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP for the remote store and connectivity probes
//! - [`NetworkMonitor`](network::NetworkMonitor) - Platform connectivity signal and change notifications
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`Timer`](time::Timer) - Injectable sleep used by retry backoff
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | Web      | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map platform failures onto the closest variant so callers can tell
//! storage failures apart from transport failures.
//!
//! ## Thread Safety
//!
//! Every bridge trait requires `Send + Sync` so implementations can be shared
//! across async tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use storage::{KeyValueStore, KeyValueTransaction};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock, Timer};
