//! Persistent Store Adapter - section ownership and scalar writes
//!
//! Maps an interface name to the UCI section that binds it and writes the
//! IPv4 scalars the network service understands. Every call loads the
//! package, works on it and unloads it before returning.

use ifsync_common::{IfsyncError, IfsyncResult};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, instrument, warn};

use crate::tables::{uci_options, UCI_CONFIG_DIR, UCI_NETWORK_PACKAGE};
use crate::types::Ipv4Config;
use crate::uci::UciContext;

/// IPv4 field of an interface as seen by the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarField {
    Enabled,
    Origin,
    Mtu,
    Ipv4Address,
    Forwarding,
    PrefixLength,
    Neighbor,
}

impl ScalarField {
    /// Fields the store can hold, in the order the engine writes them.
    pub const WRITABLE: [ScalarField; 4] = [
        ScalarField::Enabled,
        ScalarField::Origin,
        ScalarField::Mtu,
        ScalarField::Ipv4Address,
    ];

    /// UCI option backing this field, `None` for fields that have no
    /// option mapping yet.
    pub fn uci_option(&self) -> Option<&'static str> {
        match self {
            ScalarField::Enabled => Some(uci_options::ENABLED),
            ScalarField::Origin => Some(uci_options::PROTO),
            ScalarField::Mtu => Some(uci_options::MTU),
            ScalarField::Ipv4Address => Some(uci_options::IPADDR),
            ScalarField::Forwarding | ScalarField::PrefixLength | ScalarField::Neighbor => None,
        }
    }

    /// Option value for this field from `cfg`. `None` means unset.
    pub fn uci_value(&self, cfg: &Ipv4Config) -> Option<String> {
        match self {
            ScalarField::Enabled => Some(if cfg.enabled { "1" } else { "0" }.to_string()),
            ScalarField::Origin => Some(cfg.origin.as_uci_proto().to_string()),
            ScalarField::Mtu => (cfg.mtu != 0).then(|| cfg.mtu.to_string()),
            ScalarField::Ipv4Address => {
                (!cfg.address.ip.is_empty()).then(|| cfg.address.ip.clone())
            }
            ScalarField::Forwarding | ScalarField::PrefixLength | ScalarField::Neighbor => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarField::Enabled => "enabled",
            ScalarField::Origin => "origin",
            ScalarField::Mtu => "mtu",
            ScalarField::Ipv4Address => "ipv4-address",
            ScalarField::Forwarding => "forwarding",
            ScalarField::PrefixLength => "prefix-length",
            ScalarField::Neighbor => "neighbor",
        }
    }
}

impl fmt::Display for ScalarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a scalar write did to the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Option set to the new value.
    Written,
    /// Value was unset, option removed.
    Removed,
    /// Field has no store mapping; nothing was touched.
    Skipped,
}

/// Adapter over the UCI `network` package.
#[derive(Debug)]
pub struct PersistentStore {
    ctx: UciContext,
    package: String,
    ifname_option: String,
}

impl Default for PersistentStore {
    fn default() -> Self {
        Self::new(UCI_CONFIG_DIR, UCI_NETWORK_PACKAGE, uci_options::IFNAME)
    }
}

impl PersistentStore {
    pub fn new(
        config_dir: impl Into<PathBuf>,
        package: impl Into<String>,
        ifname_option: impl Into<String>,
    ) -> Self {
        Self {
            ctx: UciContext::new(config_dir),
            package: package.into(),
            ifname_option: ifname_option.into(),
        }
    }

    /// Packages still loaded; zero whenever no call is in progress.
    pub fn loaded_packages(&self) -> usize {
        self.ctx.loaded_packages()
    }

    /// Key of the first section whose interface binding equals `ifname`.
    ///
    /// A package that cannot be loaded is treated like one with no match.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve_section(&self, ifname: &str) -> Option<String> {
        let found = self.ctx.with_package(&self.package, |pkg| {
            pkg.sections()
                .find(|s| s.option(&self.ifname_option) == Some(ifname))
                .map(|s| s.name.clone())
        });

        match found {
            Ok(Some(section)) => {
                debug!(interface = %ifname, section = %section, "Resolved owning section");
                Some(section)
            }
            Ok(None) => {
                debug!(interface = %ifname, "No section binds interface");
                None
            }
            Err(e) => {
                warn!(interface = %ifname, error = %e, "Failed to resolve section");
                None
            }
        }
    }

    /// Write one field to `section`. `None` removes the option.
    ///
    /// Fields without a store mapping are accepted and ignored.
    #[instrument(skip(self), level = "debug")]
    pub fn apply_scalar(
        &self,
        section: &str,
        field: ScalarField,
        value: Option<&str>,
    ) -> IfsyncResult<WriteOutcome> {
        let Some(option) = field.uci_option() else {
            debug!(section, %field, "Field is not writable yet, skipping");
            return Ok(WriteOutcome::Skipped);
        };

        self.ctx.with_package_mut(&self.package, |pkg| {
            let package = pkg.name.clone();
            let target = pkg.section_mut(section).ok_or_else(|| {
                IfsyncError::store(package, "set", format!("no section '{}'", section))
            })?;

            Ok(match value {
                Some(v) => {
                    target.set_option(option, v);
                    WriteOutcome::Written
                }
                None => {
                    target.remove_option(option);
                    WriteOutcome::Removed
                }
            })
        })
    }

    /// Read back a single option.
    pub fn option(&self, section: &str, option: &str) -> IfsyncResult<Option<String>> {
        self.ctx.with_package(&self.package, |pkg| {
            pkg.section(section)
                .and_then(|s| s.option(option))
                .map(str::to_string)
        })
    }
}
