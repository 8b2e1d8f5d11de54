//! Kernel State Reader - link, address and neighbor dumps over NETLINK_ROUTE
//!
//! Each dump opens its own socket, sends one `NLM_F_DUMP` request and reads
//! the multipart reply until `NLMSG_DONE`. Nothing here ever modifies
//! kernel state.
//!
//! A source that cannot be opened is not fatal: the reader logs a warning
//! and returns an empty result, and the rest of the daemon continues with
//! zero interfaces.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, info, trace, warn};

use ifsync_common::IfsyncResult;

use crate::types::InterfaceRecord;

/// One entry of the kernel link table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    pub index: u32,
    pub name: String,
    pub mtu: Option<u32>,
}

/// One IPv4 address assigned to a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressInfo {
    pub index: u32,
    pub ip: Ipv4Addr,
    pub prefix_length: u8,
}

/// One neighbor cache entry that carries both addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborPair {
    pub ip: IpAddr,
    pub link_layer_address: String,
}

/// Raw access to the kernel tables.
///
/// Implemented over netlink for the daemon and by fixtures in tests.
pub trait KernelSource: Send {
    fn dump_links(&mut self) -> IfsyncResult<Vec<LinkInfo>>;

    fn dump_ipv4_addresses(&mut self) -> IfsyncResult<Vec<AddressInfo>>;

    /// Neighbor cache snapshot. Entries lacking either address are dropped
    /// by the implementation.
    fn dump_neighbors(&mut self) -> IfsyncResult<Vec<NeighborPair>>;
}

/// Read-only view of kernel interface state.
pub struct KernelStateReader {
    source: Box<dyn KernelSource>,
}

impl KernelStateReader {
    pub fn new(source: Box<dyn KernelSource>) -> Self {
        Self { source }
    }

    /// Reader backed by the kernel's NETLINK_ROUTE family.
    pub fn netlink() -> Self {
        Self::new(Box::new(NetlinkKernel::new()))
    }

    /// Kernel link table in kernel response order. Empty if the channel
    /// could not be used.
    pub fn links(&mut self) -> Vec<LinkInfo> {
        match self.source.dump_links() {
            Ok(links) => links,
            Err(e) => {
                warn!(error = %e, "Link dump failed, continuing with no interfaces");
                Vec::new()
            }
        }
    }

    /// One record per link name, with IPv4 defaults.
    ///
    /// Order follows the kernel response. Duplicates are passed through;
    /// the registry rejects them on insertion.
    pub fn enumerate_interfaces(&mut self) -> Vec<InterfaceRecord> {
        records_from_links(&self.links())
    }

    /// IPv4 addresses of every link. Empty if the channel could not be used.
    pub fn ipv4_addresses(&mut self) -> Vec<AddressInfo> {
        match self.source.dump_ipv4_addresses() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(error = %e, "Address dump failed");
                Vec::new()
            }
        }
    }

    /// (IP, link-layer address) pairs from a full neighbor cache snapshot.
    pub fn neighbor_table(&mut self) -> Vec<NeighborPair> {
        match self.source.dump_neighbors() {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(error = %e, "Neighbor dump failed");
                Vec::new()
            }
        }
    }
}

/// Build interface records from a link dump.
pub fn records_from_links(links: &[LinkInfo]) -> Vec<InterfaceRecord> {
    links
        .iter()
        .filter(|link| !link.name.is_empty())
        .map(|link| {
            info!(index = link.index, interface = %link.name, "Found network interface");
            InterfaceRecord::new(link.name.clone())
        })
        .collect()
}

/// First IPv4 address of the link with `index`, in dump order.
pub fn first_address_of(addrs: &[AddressInfo], index: u32) -> Option<&AddressInfo> {
    addrs.iter().find(|a| a.index == index)
}

/// Format a hardware address as colon-separated lowercase hex.
pub fn format_lladdr(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use ifsync_common::IfsyncError;
    use netlink_packet_core::{
        NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST,
    };
    use netlink_packet_route::address::{AddressAttribute, AddressMessage};
    use netlink_packet_route::link::{LinkAttribute, LinkMessage};
    use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
    use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
    use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

    /// Receive buffer size for one datagram of a dump reply
    const RECV_BUFFER_SIZE: usize = 64 * 1024;

    /// Netlink-backed kernel source.
    #[derive(Debug, Default)]
    pub struct NetlinkKernel {
        sequence: u32,
    }

    impl NetlinkKernel {
        pub fn new() -> Self {
            Self::default()
        }

        fn open() -> IfsyncResult<Socket> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| IfsyncError::netlink("socket", e.to_string()))?;
            socket
                .bind_auto()
                .map_err(|e| IfsyncError::netlink("bind", e.to_string()))?;
            socket
                .connect(&SocketAddr::new(0, 0))
                .map_err(|e| IfsyncError::netlink("connect", e.to_string()))?;
            Ok(socket)
        }

        /// Send a dump request and collect every reply payload.
        fn dump(
            &mut self,
            request: RouteNetlinkMessage,
        ) -> IfsyncResult<Vec<RouteNetlinkMessage>> {
            let socket = Self::open()?;

            self.sequence = self.sequence.wrapping_add(1);
            let mut header = NetlinkHeader::default();
            header.flags = NLM_F_REQUEST | NLM_F_DUMP;
            header.sequence_number = self.sequence;

            let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(request));
            packet.finalize();
            let mut out = vec![0u8; packet.buffer_len()];
            packet.serialize(&mut out);

            socket
                .send(&out, 0)
                .map_err(|e| IfsyncError::netlink("send", e.to_string()))?;

            let mut replies = Vec::new();
            loop {
                let mut buf = Vec::with_capacity(RECV_BUFFER_SIZE);
                let len = socket
                    .recv(&mut buf, 0)
                    .map_err(|e| IfsyncError::netlink("recv", e.to_string()))?;
                if len == 0 {
                    return Ok(replies);
                }

                let mut offset = 0;
                while offset < buf.len() {
                    let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..])
                        .map_err(|e| IfsyncError::netlink("parse", e.to_string()))?;

                    let msg_len = msg.header.length as usize;
                    if msg_len == 0 {
                        return Ok(replies);
                    }
                    // Align to 4 bytes (netlink alignment requirement)
                    offset = (offset + msg_len + 3) & !3;

                    match msg.payload {
                        NetlinkPayload::Done(_) => {
                            trace!(count = replies.len(), "Dump complete");
                            return Ok(replies);
                        }
                        NetlinkPayload::Error(err) => {
                            return Err(IfsyncError::netlink("dump", format!("{:?}", err)));
                        }
                        NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                        _ => {}
                    }
                }
            }
        }
    }

    /// Link record of a `RTM_NEWLINK` message. Links without a name are
    /// ignored.
    fn link_info(link: &LinkMessage) -> Option<LinkInfo> {
        let mut name = None;
        let mut mtu = None;
        for attr in &link.attributes {
            match attr {
                LinkAttribute::IfName(n) => name = Some(n.clone()),
                LinkAttribute::Mtu(m) => mtu = Some(*m),
                _ => {}
            }
        }
        name.map(|name| LinkInfo {
            index: link.header.index,
            name,
            mtu,
        })
    }

    /// IPv4 address of a `RTM_NEWADDR` message.
    ///
    /// IFA_LOCAL is the interface address; IFA_ADDRESS is the peer on
    /// point-to-point links.
    fn address_info(addr: &AddressMessage) -> Option<AddressInfo> {
        let mut local = None;
        let mut address = None;
        for attr in &addr.attributes {
            match attr {
                AddressAttribute::Local(IpAddr::V4(ip)) => local = Some(*ip),
                AddressAttribute::Address(IpAddr::V4(ip)) => address = Some(*ip),
                _ => {}
            }
        }
        local.or(address).map(|ip| AddressInfo {
            index: addr.header.index,
            ip,
            prefix_length: addr.header.prefix_len,
        })
    }

    /// (IP, link-layer address) pair of a `RTM_NEWNEIGH` message, or `None`
    /// when either address is missing.
    fn neighbor_pair(neigh: &NeighbourMessage) -> Option<NeighborPair> {
        let mut ip = None;
        let mut lladdr = None;
        for attr in &neigh.attributes {
            match attr {
                NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => {
                    ip = Some(IpAddr::V4(*v4))
                }
                NeighbourAttribute::Destination(NeighbourAddress::Inet6(v6)) => {
                    ip = Some(IpAddr::V6(*v6))
                }
                NeighbourAttribute::LinkLocalAddress(bytes) if !bytes.is_empty() => {
                    lladdr = Some(format_lladdr(bytes))
                }
                _ => {}
            }
        }
        match (ip, lladdr) {
            (Some(ip), Some(link_layer_address)) => Some(NeighborPair {
                ip,
                link_layer_address,
            }),
            _ => {
                trace!(ifindex = neigh.header.ifindex, "Skipping incomplete neighbor");
                None
            }
        }
    }

    impl KernelSource for NetlinkKernel {
        fn dump_links(&mut self) -> IfsyncResult<Vec<LinkInfo>> {
            let replies = self.dump(RouteNetlinkMessage::GetLink(LinkMessage::default()))?;

            let links: Vec<LinkInfo> = replies
                .iter()
                .filter_map(|msg| match msg {
                    RouteNetlinkMessage::NewLink(link) => link_info(link),
                    _ => None,
                })
                .collect();

            debug!(count = links.len(), "Link dump received");
            Ok(links)
        }

        fn dump_ipv4_addresses(&mut self) -> IfsyncResult<Vec<AddressInfo>> {
            let mut request = AddressMessage::default();
            request.header.family = AddressFamily::Inet;
            let replies = self.dump(RouteNetlinkMessage::GetAddress(request))?;

            let addrs: Vec<AddressInfo> = replies
                .iter()
                .filter_map(|msg| match msg {
                    RouteNetlinkMessage::NewAddress(addr) => address_info(addr),
                    _ => None,
                })
                .collect();

            debug!(count = addrs.len(), "Address dump received");
            Ok(addrs)
        }

        fn dump_neighbors(&mut self) -> IfsyncResult<Vec<NeighborPair>> {
            let request = RouteNetlinkMessage::GetNeighbour(NeighbourMessage::default());
            let replies = self.dump(request)?;

            let pairs: Vec<NeighborPair> = replies
                .iter()
                .filter_map(|msg| match msg {
                    RouteNetlinkMessage::NewNeighbour(neigh) => neighbor_pair(neigh),
                    _ => None,
                })
                .collect();

            debug!(count = pairs.len(), "Neighbor dump received");
            Ok(pairs)
        }
    }

}

#[cfg(target_os = "linux")]
pub use linux::NetlinkKernel;

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use super::*;
    use ifsync_common::IfsyncError;

    #[derive(Debug, Default)]
    pub struct NetlinkKernel;

    impl NetlinkKernel {
        pub fn new() -> Self {
            Self
        }

        fn unavailable() -> IfsyncError {
            IfsyncError::netlink("socket", "netlink is only available on Linux")
        }
    }

    impl KernelSource for NetlinkKernel {
        fn dump_links(&mut self) -> IfsyncResult<Vec<LinkInfo>> {
            Err(Self::unavailable())
        }

        fn dump_ipv4_addresses(&mut self) -> IfsyncResult<Vec<AddressInfo>> {
            Err(Self::unavailable())
        }

        fn dump_neighbors(&mut self) -> IfsyncResult<Vec<NeighborPair>> {
            Err(Self::unavailable())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::NetlinkKernel;
