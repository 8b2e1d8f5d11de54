//! Common infrastructure for the ifsyncd interface reconciliation daemon.
//!
//! - [`error`]: error taxonomy shared by every adapter
//! - [`shell`]: shell command execution with proper quoting
//! - [`scan`]: fixed scan patterns applied to probe output
//!
//! # Example
//!
//! ```ignore
//! use ifsync_common::{scan, shell, IfsyncResult};
//!
//! async fn probe_mtu(ifname: &str) -> IfsyncResult<Option<u64>> {
//!     let cmd = shell::with_arg("/usr/libexec/ifsync/mtu", ifname);
//!     let line = shell::first_line(&cmd).await?;
//!     Ok(line.as_deref().and_then(scan::unsigned))
//! }
//! ```

pub mod error;
pub mod scan;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{IfsyncError, IfsyncResult};
