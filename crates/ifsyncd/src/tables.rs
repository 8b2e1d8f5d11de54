//! Path, option and command constants

// Datastore roots
pub const IF_CONFIG_ROOT: &str = "/ietf-interfaces:interfaces";
pub const IF_STATE_ROOT: &str = "/ietf-interfaces:interfaces-state";
pub const IPV4_CONTAINER: &str = "ietf-ip:ipv4";

// Interface type identity
pub const ETHERNET_CSMACD: &str = "iana-if-type:ethernetCsmacd";

// ietf-interfaces leaf names
pub mod if_fields {
    pub const TYPE: &str = "type";
}

// ietf-ip ipv4 leaf names
pub mod ipv4_fields {
    pub const ENABLED: &str = "enabled";
    pub const FORWARDING: &str = "forwarding";
    pub const ORIGIN: &str = "origin";
    pub const MTU: &str = "mtu";
    pub const ADDRESS: &str = "address";
    pub const IP: &str = "ip";
    pub const PREFIX_LENGTH: &str = "prefix-length";
}

// interfaces-state leaf names
pub mod state_fields {
    pub const TYPE: &str = "type";
    pub const OPER_STATUS: &str = "oper-status";
    pub const PHYS_ADDRESS: &str = "phys-address";
    pub const SPEED: &str = "speed";
    pub const OUT_OCTETS: &str = "statistics/out-octets";
    pub const OUT_ERRORS: &str = "statistics/out-errors";
    pub const IN_OCTETS: &str = "statistics/in-octets";
    pub const IN_ERRORS: &str = "statistics/in-errors";
    pub const IPV4_MTU: &str = "ipv4/mtu";
}

// Operational query node names
pub mod oper_nodes {
    pub const INTERFACE: &str = "interface";
    pub const STATISTICS: &str = "statistics";
    pub const IPV4: &str = "ipv4";
}

// UCI
pub const UCI_NETWORK_PACKAGE: &str = "network";
pub const UCI_CONFIG_DIR: &str = "/etc/config";

pub mod uci_options {
    pub const IFNAME: &str = "ifname";
    pub const ENABLED: &str = "enabled";
    pub const PROTO: &str = "proto";
    pub const MTU: &str = "mtu";
    pub const IPADDR: &str = "ipaddr";
}

// Service restart
pub const NETWORK_INIT_SCRIPT: &str = "/etc/init.d/network";
pub const RESTART_ARG: &str = "restart";
pub const RESTART_TIME_TO_WAIT_SECS: u64 = 5;
