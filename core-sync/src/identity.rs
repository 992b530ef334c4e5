//! # Identity & Addressing
//!
//! Derivation of the identifiers a catalog entry is submitted under.
//!
//! - [`VaultId`]: name-based UUID of the document id. The same document id
//!   always yields the same vault id, so re-submitting a document upserts
//!   instead of duplicating. Renaming a document id is a delete plus a create.
//! - [`PassportId`]: fresh time-ordered UUID per keep call.
//! - [`derive_ref_id`]: public reference path plus the extracted share.
//! - [`MachineContext`]: `user@host:machine-id`, computed once per process.

use bridge_traits::identity::MachineIdentity;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;
use uuid::Uuid;

/// Namespace for vault ids. Changing it re-keys every catalog entry.
const VAULT_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_9a3e_5d2b_4e87_a0c4_91f3_27d8_b5e6);

const INDEX_FILE: &str = "/index.html";

/// Deterministic catalog key of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VaultId(Uuid);

impl VaultId {
    pub fn derive(document_id: &str) -> Self {
        Self(Uuid::new_v5(&VAULT_NAMESPACE, document_id.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-submission identifier of a keep call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassportId(Uuid);

impl PassportId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PassportId {
    fn default() -> Self {
        Self::new()
    }
}

/// Public reference of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefAddress {
    pub ref_id: String,
    pub share: Option<String>,
}

/// Derive the reference path of `url`.
///
/// A trailing `/index.html` is dropped. When the path starts with one of
/// `shared_prefixes` (checked in order, whole segments only) the prefix moves
/// into `share`. An empty path becomes `/`.
///
/// ```
/// use core_sync::identity::derive_ref_id;
///
/// let address = derive_ref_id("/blog/post-1/index.html", &["blog".to_string()]);
/// assert_eq!(address.ref_id, "/post-1");
/// assert_eq!(address.share.as_deref(), Some("blog"));
/// ```
pub fn derive_ref_id(url: &str, shared_prefixes: &[String]) -> RefAddress {
    let path = url.strip_suffix(INDEX_FILE).unwrap_or(url);

    for share in shared_prefixes {
        let Some(rest) = path
            .strip_prefix('/')
            .and_then(|p| p.strip_prefix(share.as_str()))
        else {
            continue;
        };

        if rest.is_empty() || rest.starts_with('/') {
            return RefAddress {
                ref_id: or_root(rest),
                share: Some(share.clone()),
            };
        }
    }

    RefAddress {
        ref_id: or_root(path),
        share: None,
    }
}

fn or_root(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

static PROCESS_CONTEXT: OnceLock<MachineContext> = OnceLock::new();

/// Identity of the machine that produced an entry or upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineContext(String);

impl MachineContext {
    /// The context of this process, computed on first use.
    pub fn for_process(identity: &dyn MachineIdentity) -> MachineContext {
        PROCESS_CONTEXT
            .get_or_init(|| Self::from_identity(identity))
            .clone()
    }

    pub fn from_identity(identity: &dyn MachineIdentity) -> MachineContext {
        let part = |name: &str, value: bridge_traits::error::Result<String>| {
            value.unwrap_or_else(|e| {
                warn!(part = name, error = %e, "Machine identity unavailable");
                "unknown".to_string()
            })
        };

        Self::from_parts(
            &part("username", identity.username()),
            &part("hostname", identity.hostname()),
            &part("machine_id", identity.machine_id()),
        )
    }

    pub fn from_parts(username: &str, hostname: &str, machine_id: &str) -> MachineContext {
        Self(format!("{}@{}:{}", username, hostname, machine_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
