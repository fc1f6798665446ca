//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `KeyValueStore` using an SQLite table (`sqlx`)
//! - `HttpClient` using `reqwest`
//! - `NetworkMonitor` using TCP reachability checks
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, ReqwestHttpClient, SqliteKeyValueStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let store = SqliteKeyValueStore::new("/path/to/propdash.db".into()).await?;
//!     let http = ReqwestHttpClient::new()?;
//!     let network = DesktopNetworkMonitor::new();
//!
//!     // Hand them to CoreConfig
//!     Ok(())
//! }
//! ```

mod http;
mod network;
mod store;

pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
pub use store::SqliteKeyValueStore;
