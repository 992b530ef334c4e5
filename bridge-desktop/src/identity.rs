//! Machine identity for desktop and CI hosts.

use bridge_traits::{
    error::{BridgeError, Result},
    identity::MachineIdentity,
};
use std::path::PathBuf;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Reads the installation id from the usual machine-id files and falls back
/// to the hostname when none exists (macOS, Windows, minimal containers).
#[derive(Debug, Clone)]
pub struct DesktopMachineIdentity {
    id_paths: Vec<PathBuf>,
}

impl DesktopMachineIdentity {
    pub fn new() -> Self {
        Self {
            id_paths: MACHINE_ID_PATHS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Look for the machine id in `paths` instead of the system locations.
    pub fn with_id_paths(paths: Vec<PathBuf>) -> Self {
        Self { id_paths: paths }
    }
}

impl Default for DesktopMachineIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineIdentity for DesktopMachineIdentity {
    fn machine_id(&self) -> Result<String> {
        for path in &self.id_paths {
            if let Ok(contents) = std::fs::read_to_string(path) {
                let id = contents.trim();
                if !id.is_empty() {
                    return Ok(id.to_string());
                }
            }
        }
        self.hostname()
    }

    fn hostname(&self) -> Result<String> {
        let name = hostname::get()?;
        name.into_string()
            .map_err(|raw| BridgeError::OperationFailed(format!("Non UTF-8 hostname: {:?}", raw)))
    }

    fn username(&self) -> Result<String> {
        Ok(whoami::username())
    }
}
