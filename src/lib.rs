//! Workspace placeholder crate.
//!
//! Exposes the `desktop-shims` feature, which pulls in `core-service` with the
//! native bridges wired up. Build hosts can depend on `vault-sync-workspace`
//! and call `bootstrap` without naming every workspace crate.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
