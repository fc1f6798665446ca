//! # Outbox Synchronization
//!
//! Delivers the catalog's outbox to a remote store.
//!
//! ## Components
//!
//! - **Connectivity Monitor** (`network`): process-wide online/offline status
//! - **Remote Store** (`remote`, `rest`): remote collaborator contract and its
//!   PostgREST-style HTTP implementation
//! - **Backoff** (`backoff`): capped exponential delays between retry passes
//! - **Sync Processor** (`processor`): drains the outbox, classifying failures
//! - **Sync Manager** (`manager`): interval, reconnect and on-demand drains,
//!   one at a time

pub mod backoff;
pub mod error;
pub mod manager;
pub mod network;
pub mod processor;
pub mod remote;
pub mod rest;

pub use backoff::{Backoff, BackoffPolicy, TokioTimer};
pub use error::{RemoteError, RemoteErrorKind, RemoteResult, Result, SyncError};
pub use manager::{SyncManager, SyncStatus};
pub use network::{ConnectivityMonitor, MonitorOptions, NetStatus};
pub use processor::{FailedItem, SkipReason, SyncProcessor, SyncResult};
pub use remote::{NullRemote, RemoteStore, UpsertedDataset};
pub use rest::RestRemote;
