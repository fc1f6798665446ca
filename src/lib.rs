//! Workspace umbrella crate.
//!
//! Exposes the feature flags that map onto the individual workspace crates so a
//! host application can depend on `propdash-workspace` alone and get the
//! desktop adapters without wiring each crate by hand.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
