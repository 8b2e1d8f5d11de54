//! Shared fixtures for ifsyncd integration tests

#![allow(dead_code)]

use ifsyncd::{
    AddressInfo, IfsyncResult, KernelSource, KernelStateReader, LinkInfo, MemoryDatastore,
    NeighborPair, PersistentStore, ReconciliationEngine, RestartScheduler,
};
use mockall::mock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

mock! {
    pub Restarter {}

    impl RestartScheduler for Restarter {
        fn schedule_restart(&self, delay: Duration);
    }
}

/// Kernel tables served from memory.
#[derive(Debug, Clone, Default)]
pub struct StaticKernel {
    pub links: Vec<LinkInfo>,
    pub addresses: Vec<AddressInfo>,
    pub neighbors: Vec<NeighborPair>,
}

impl KernelSource for StaticKernel {
    fn dump_links(&mut self) -> IfsyncResult<Vec<LinkInfo>> {
        Ok(self.links.clone())
    }

    fn dump_ipv4_addresses(&mut self) -> IfsyncResult<Vec<AddressInfo>> {
        Ok(self.addresses.clone())
    }

    fn dump_neighbors(&mut self) -> IfsyncResult<Vec<NeighborPair>> {
        Ok(self.neighbors.clone())
    }
}

pub fn link(index: u32, name: &str, mtu: Option<u32>) -> LinkInfo {
    LinkInfo {
        index,
        name: name.to_string(),
        mtu,
    }
}

/// Reader over links named `names`, indexed from 1, without MTU.
pub fn kernel_with(names: &[&str]) -> KernelStateReader {
    let links = names
        .iter()
        .enumerate()
        .map(|(i, name)| link(i as u32 + 1, name, None))
        .collect();
    KernelStateReader::new(Box::new(StaticKernel {
        links,
        ..Default::default()
    }))
}

/// `network` package binding `eth0` to section `lan`.
pub const LAN_ETH0: &str = "\
config interface 'loopback'
\toption ifname 'lo'
\toption proto 'static'

config interface 'lan'
\toption ifname 'eth0'
\toption proto 'static'
\toption ipaddr '192.168.1.1'
";

/// Temp config dir holding `network` with `text`.
pub fn config_dir(text: &str) -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("network"), text).expect("write network");
    dir
}

pub fn store_in(dir: &Path) -> PersistentStore {
    PersistentStore::new(dir, "network", "ifname")
}

pub fn engine(
    dir: &Path,
    datastore: Arc<MemoryDatastore>,
    restarter: MockRestarter,
) -> ReconciliationEngine {
    ReconciliationEngine::new(
        store_in(dir),
        datastore,
        Arc::new(restarter),
        Duration::from_secs(5),
    )
}

/// Restarter expecting exactly `times` restarts.
pub fn restarter_expecting(times: usize) -> MockRestarter {
    let mut mock = MockRestarter::new();
    mock.expect_schedule_restart().times(times).return_const(());
    mock
}

pub fn read_network(dir: &Path) -> String {
    std::fs::read_to_string(dir.join("network")).expect("read network")
}
