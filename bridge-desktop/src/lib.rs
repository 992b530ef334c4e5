//! # Desktop Bridge Implementations
//!
//! Native implementations of the bridge traits for macOS, Windows and Linux
//! build hosts:
//! - `HttpClient` using `reqwest` (JSON and multipart bodies)
//! - `FileLocker` using `fs4` advisory locks
//! - `MachineIdentity` using the machine-id file, `hostname` and `whoami`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopMachineIdentity, Fs4FileLocker, ReqwestHttpClient};
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let locker = Arc::new(Fs4FileLocker::new());
//! let identity = DesktopMachineIdentity::new();
//! ```

mod http;
mod identity;
mod lock;

pub use http::ReqwestHttpClient;
pub use identity::DesktopMachineIdentity;
pub use lock::Fs4FileLocker;
