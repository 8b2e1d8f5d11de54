//! Operational provider - answers interfaces-state queries from probes
//!
//! A query is dispatched on the name of its last node:
//!
//! - `interface`: type, oper-status, phys-address, speed
//! - `statistics`: out-octets, out-errors, in-octets, in-errors
//! - `ipv4`: mtu
//!
//! Any other node yields an empty answer. A probe that fails to run or
//! prints something unparsable contributes a zero or empty value for its
//! own field only.

use async_trait::async_trait;
use ifsync_common::{scan, shell, IfsyncResult};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config_file::ProbesConfig;
use crate::registry::InterfaceRegistry;
use crate::tables::{oper_nodes, state_fields, ETHERNET_CSMACD};
use crate::types::{DataValue, TypedValue};
use crate::xpath;

/// Runs a probe command for one interface.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    /// First line printed by `command` when given `ifname`.
    async fn first_line(&self, command: &str, ifname: &str) -> IfsyncResult<Option<String>>;
}

/// Runs probes through `/bin/sh`, passing the interface name quoted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellProbeRunner;

#[async_trait]
impl ProbeRunner for ShellProbeRunner {
    async fn first_line(&self, command: &str, ifname: &str) -> IfsyncResult<Option<String>> {
        shell::first_line(&shell::with_arg(command, ifname)).await
    }
}

/// Answers operational queries.
pub struct OperationalProvider {
    probes: ProbesConfig,
    runner: Arc<dyn ProbeRunner>,
}

impl OperationalProvider {
    pub fn new(probes: ProbesConfig, runner: Arc<dyn ProbeRunner>) -> Self {
        Self { probes, runner }
    }

    /// Provider running the configured probes through the shell.
    pub fn with_shell(probes: ProbesConfig) -> Self {
        Self::new(probes, Arc::new(ShellProbeRunner))
    }

    /// Answer `query`.
    ///
    /// A query keyed by `interface[name='X']` is answered for X only;
    /// otherwise for every registered interface in registry order.
    #[instrument(skip(self, registry))]
    pub async fn provide(&self, query: &str, registry: &InterfaceRegistry) -> Vec<TypedValue> {
        let Some(node) = xpath::node_name(query) else {
            return Vec::new();
        };

        let targets: Vec<String> = match xpath::key_value(query, oper_nodes::INTERFACE, "name") {
            Some(name) => vec![name.to_string()],
            None => registry.names(),
        };

        let mut values = Vec::new();
        for name in &targets {
            match node {
                oper_nodes::INTERFACE => values.extend(self.interface_values(name).await),
                oper_nodes::STATISTICS => values.extend(self.statistics_values(name).await),
                oper_nodes::IPV4 => values.extend(self.ipv4_values(name).await),
                _ => {
                    debug!(node, "Unsupported operational node");
                    return Vec::new();
                }
            }
        }
        values
    }

    async fn interface_values(&self, name: &str) -> Vec<TypedValue> {
        let oper_status = self.probe_word(&self.probes.oper_status, name).await;
        let phys_address = self.probe_word(&self.probes.phys_address, name).await;
        let speed = self.probe_unsigned(&self.probes.speed, name).await;

        vec![
            TypedValue::new(
                xpath::state(name, state_fields::TYPE),
                DataValue::IdentityRef(ETHERNET_CSMACD.to_string()),
            ),
            TypedValue::new(
                xpath::state(name, state_fields::OPER_STATUS),
                DataValue::Enum(oper_status),
            ),
            TypedValue::new(
                xpath::state(name, state_fields::PHYS_ADDRESS),
                DataValue::String(phys_address),
            ),
            TypedValue::new(
                xpath::state(name, state_fields::SPEED),
                DataValue::Uint64(speed),
            ),
        ]
    }

    async fn statistics_values(&self, name: &str) -> Vec<TypedValue> {
        let out_octets = self.probe_unsigned(&self.probes.tx_octets, name).await;
        let out_errors = narrow::<u32>(self.probe_unsigned(&self.probes.tx_errors, name).await);
        let in_octets = self.probe_unsigned(&self.probes.rx_octets, name).await;
        let in_errors = narrow::<u32>(self.probe_unsigned(&self.probes.rx_errors, name).await);

        vec![
            TypedValue::new(
                xpath::state(name, state_fields::OUT_OCTETS),
                DataValue::Uint64(out_octets),
            ),
            TypedValue::new(
                xpath::state(name, state_fields::OUT_ERRORS),
                DataValue::Uint32(out_errors),
            ),
            TypedValue::new(
                xpath::state(name, state_fields::IN_OCTETS),
                DataValue::Uint64(in_octets),
            ),
            TypedValue::new(
                xpath::state(name, state_fields::IN_ERRORS),
                DataValue::Uint32(in_errors),
            ),
        ]
    }

    async fn ipv4_values(&self, name: &str) -> Vec<TypedValue> {
        let mtu = narrow::<u16>(self.probe_unsigned(&self.probes.mtu, name).await);
        vec![TypedValue::new(
            xpath::state(name, state_fields::IPV4_MTU),
            DataValue::Uint16(mtu),
        )]
    }

    async fn probe_line(&self, command: &str, name: &str) -> Option<String> {
        match self.runner.first_line(command, name).await {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                debug!(interface = %name, command, "Probe printed nothing");
                None
            }
            Err(e) => {
                debug!(interface = %name, command, error = %e, "Probe failed");
                None
            }
        }
    }

    async fn probe_word(&self, command: &str, name: &str) -> String {
        let line = self.probe_line(command, name).await;
        match line.as_deref().and_then(scan::word) {
            Some(word) => word,
            None => {
                debug!(interface = %name, command, "Probe output did not parse");
                String::new()
            }
        }
    }

    async fn probe_unsigned(&self, command: &str, name: &str) -> u64 {
        let line = self.probe_line(command, name).await;
        match line.as_deref().and_then(scan::unsigned) {
            Some(v) => v,
            None => {
                debug!(interface = %name, command, "Probe output did not parse");
                0
            }
        }
    }
}

/// Narrow a probe value to the field's width; out of range is a parse
/// failure and yields zero.
fn narrow<T: TryFrom<u64> + Default>(v: u64) -> T {
    T::try_from(v).unwrap_or_default()
}
