//! Host identity lookup.
//!
//! Uploads and catalog entries made outside global mode are tagged with the
//! producing machine, so several build machines can share one remote space.

use crate::error::Result;

/// Source of the facts that make up a machine context.
pub trait MachineIdentity: Send + Sync {
    /// Stable identifier of the installation (e.g. `/etc/machine-id`).
    fn machine_id(&self) -> Result<String>;

    fn hostname(&self) -> Result<String>;

    /// Login name of the OS user running the build.
    fn username(&self) -> Result<String>;
}
