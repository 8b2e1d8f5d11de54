//! Interface Synchronization Daemon
//!
//! Keeps three views of network interface configuration consistent: live
//! kernel state read over netlink, the UCI `network` package, and an
//! ietf-interfaces management datastore.
//!
//! At startup the kernel link table seeds the interface registry, each
//! interface is bound to its UCI section and the datastore is seeded. On
//! every `apply` change notification the datastore is pulled, the UCI
//! package is rewritten and a delayed network service restart makes the
//! kernel pick the new configuration up.

pub mod bridge;
pub mod config_file;
pub mod datastore;
pub mod engine;
pub mod kernel;
pub mod provider;
pub mod redis_adapter;
pub mod registry;
pub mod restart;
pub mod store;
pub mod tables;
pub mod types;
pub mod uci;
pub mod xpath;

pub use config_file::{DatastoreConfig, IfsyncConfig, ProbesConfig, RestartConfig, StoreConfig};
pub use datastore::{Datastore, MemoryDatastore};
pub use engine::{
    on_datastore_change, on_link_dump_reply, ApplyReport, ChangeOutcome, EngineCommand,
    EngineState, LinkDump, ReconciliationEngine, StartupReport, Transition,
};
pub use kernel::{
    AddressInfo, KernelSource, KernelStateReader, LinkInfo, NeighborPair, NetlinkKernel,
};
pub use provider::{OperationalProvider, ProbeRunner, ShellProbeRunner};
pub use redis_adapter::{DatastoreMessage, DatastoreSubscription, RedisDatastore};
pub use registry::InterfaceRegistry;
pub use restart::{RestartScheduler, ServiceRestarter};
pub use store::{PersistentStore, ScalarField, WriteOutcome};
pub use types::*;

pub use ifsync_common::{IfsyncError, IfsyncResult};
