//! Configuration file support for ifsyncd
//!
//! Loads and validates ifsyncd configuration from TOML files.
//! Default location: /etc/ifsyncd/ifsyncd.toml

use ifsync_common::{IfsyncError, IfsyncResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::tables::{
    uci_options, NETWORK_INIT_SCRIPT, RESTART_TIME_TO_WAIT_SECS, UCI_CONFIG_DIR,
    UCI_NETWORK_PACKAGE,
};

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ifsyncd/ifsyncd.toml";

/// Management datastore configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number
    #[serde(default)]
    pub db_number: u32,

    /// Hash holding the running view (xpath -> value)
    #[serde(default = "default_running_key")]
    pub running_key: String,

    /// Hash receiving operational answers
    #[serde(default = "default_operational_key")]
    pub operational_key: String,

    /// Channel carrying change notifications (verify/apply/abort)
    #[serde(default = "default_change_channel")]
    pub change_channel: String,

    /// Channel carrying operational queries (payload is the query path)
    #[serde(default = "default_oper_request_channel")]
    pub oper_request_channel: String,
}

/// Persistent store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding UCI packages
    #[serde(default = "default_config_dir")]
    pub config_dir: String,

    /// Package holding interface sections
    #[serde(default = "default_package")]
    pub package: String,

    /// Option binding a section to an interface name
    #[serde(default = "default_ifname_option")]
    pub ifname_option: String,
}

/// Service restart configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Network service script, invoked with `restart`
    #[serde(default = "default_restart_command")]
    pub command: String,

    /// Delay before the restart runs, in seconds
    #[serde(default = "default_restart_delay")]
    pub delay_secs: u64,
}

/// Probe commands. Each is run as `<command> "<ifname>"` and must print
/// one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbesConfig {
    #[serde(default = "default_probe_oper_status")]
    pub oper_status: String,

    #[serde(default = "default_probe_phys_address")]
    pub phys_address: String,

    /// Must print bits per second
    #[serde(default = "default_probe_speed")]
    pub speed: String,

    #[serde(default = "default_probe_tx_octets")]
    pub tx_octets: String,

    #[serde(default = "default_probe_tx_errors")]
    pub tx_errors: String,

    #[serde(default = "default_probe_rx_octets")]
    pub rx_octets: String,

    #[serde(default = "default_probe_rx_errors")]
    pub rx_errors: String,

    #[serde(default = "default_probe_mtu")]
    pub mtu: String,
}

/// Complete ifsyncd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfsyncConfig {
    #[serde(default)]
    pub datastore: DatastoreConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub restart: RestartConfig,

    #[serde(default)]
    pub probes: ProbesConfig,
}

// Default functions
fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_running_key() -> String {
    "IETF_INTERFACES_RUNNING".to_string()
}

fn default_operational_key() -> String {
    "IETF_INTERFACES_STATE".to_string()
}

fn default_change_channel() -> String {
    "IETF_INTERFACES_CHANGE".to_string()
}

fn default_oper_request_channel() -> String {
    "IETF_INTERFACES_STATE_REQUEST".to_string()
}

fn default_config_dir() -> String {
    UCI_CONFIG_DIR.to_string()
}

fn default_package() -> String {
    UCI_NETWORK_PACKAGE.to_string()
}

fn default_ifname_option() -> String {
    uci_options::IFNAME.to_string()
}

fn default_restart_command() -> String {
    NETWORK_INIT_SCRIPT.to_string()
}

fn default_restart_delay() -> u64 {
    RESTART_TIME_TO_WAIT_SECS
}

/// `sh -c` wrapper reading one sysfs attribute of the interface passed as `$1`
fn sysfs_probe(attr: &str) -> String {
    format!("/bin/sh -c 'cat /sys/class/net/\"$1\"/{}' probe", attr)
}

fn default_probe_oper_status() -> String {
    sysfs_probe("operstate")
}

fn default_probe_phys_address() -> String {
    sysfs_probe("address")
}

fn default_probe_speed() -> String {
    // sysfs reports Mb/s
    "/bin/sh -c 'echo $(( $(cat /sys/class/net/\"$1\"/speed) * 1000000 ))' probe".to_string()
}

fn default_probe_tx_octets() -> String {
    sysfs_probe("statistics/tx_bytes")
}

fn default_probe_tx_errors() -> String {
    sysfs_probe("statistics/tx_errors")
}

fn default_probe_rx_octets() -> String {
    sysfs_probe("statistics/rx_bytes")
}

fn default_probe_rx_errors() -> String {
    sysfs_probe("statistics/rx_errors")
}

fn default_probe_mtu() -> String {
    sysfs_probe("mtu")
}

// Default implementations
impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            db_number: 0,
            running_key: default_running_key(),
            operational_key: default_operational_key(),
            change_channel: default_change_channel(),
            oper_request_channel: default_oper_request_channel(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            package: default_package(),
            ifname_option: default_ifname_option(),
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            command: default_restart_command(),
            delay_secs: default_restart_delay(),
        }
    }
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            oper_status: default_probe_oper_status(),
            phys_address: default_probe_phys_address(),
            speed: default_probe_speed(),
            tx_octets: default_probe_tx_octets(),
            tx_errors: default_probe_tx_errors(),
            rx_octets: default_probe_rx_octets(),
            rx_errors: default_probe_rx_errors(),
            mtu: default_probe_mtu(),
        }
    }
}

impl DatastoreConfig {
    /// Redis connection URL
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.db_number
        )
    }
}

impl IfsyncConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> IfsyncResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    IfsyncError::invalid_config(
                        path.display().to_string(),
                        format!("failed to parse: {}", e),
                    )
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(IfsyncError::Io(e)),
        }
    }

    /// Get restart delay as Duration
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart.delay_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> IfsyncResult<()> {
        if self.datastore.redis_port == 0 {
            return Err(IfsyncError::invalid_config(
                "datastore.redis_port",
                "must be > 0",
            ));
        }

        let names = [
            ("datastore.running_key", &self.datastore.running_key),
            ("datastore.operational_key", &self.datastore.operational_key),
            ("datastore.change_channel", &self.datastore.change_channel),
            (
                "datastore.oper_request_channel",
                &self.datastore.oper_request_channel,
            ),
            ("store.config_dir", &self.store.config_dir),
            ("store.package", &self.store.package),
            ("store.ifname_option", &self.store.ifname_option),
            ("restart.command", &self.restart.command),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(IfsyncError::invalid_config(field, "must not be empty"));
            }
        }

        if self.store.package.contains('/') {
            return Err(IfsyncError::invalid_config(
                "store.package",
                "must be a file name, not a path",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = IfsyncConfig::default();
        assert_eq!(config.datastore.redis_host, "127.0.0.1");
        assert_eq!(config.datastore.redis_port, 6379);
        assert_eq!(config.store.config_dir, "/etc/config");
        assert_eq!(config.store.package, "network");
        assert_eq!(config.store.ifname_option, "ifname");
        assert_eq!(config.restart.command, "/etc/init.d/network");
        assert_eq!(config.restart_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_probe_defaults() {
        let probes = ProbesConfig::default();
        assert_eq!(
            probes.mtu,
            "/bin/sh -c 'cat /sys/class/net/\"$1\"/mtu' probe"
        );
        assert!(probes.tx_octets.contains("statistics/tx_bytes"));
        assert!(probes.speed.contains("1000000"));
    }

    #[test]
    fn test_redis_url() {
        let config = DatastoreConfig::default();
        assert_eq!(config.redis_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(IfsyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_redis_port() {
        let mut config = IfsyncConfig::default();
        config.datastore.redis_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_package() {
        let mut config = IfsyncConfig::default();
        config.store.package = " ".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            IfsyncError::InvalidConfig { ref field, .. } if field == "store.package"
        ));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[datastore]
redis_port = 6380

[store]
config_dir = "/tmp/uci"

[restart]
delay_secs = 1
"#;
        let config: IfsyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.datastore.redis_port, 6380);
        assert_eq!(config.store.config_dir, "/tmp/uci");
        assert_eq!(config.restart_delay(), Duration::from_secs(1));
        // Unspecified values should use defaults
        assert_eq!(config.datastore.running_key, "IETF_INTERFACES_RUNNING");
        assert_eq!(config.store.package, "network");
        assert_eq!(config.probes, ProbesConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[probes]\nmtu = \"echo 1500\"").unwrap();

        let config = IfsyncConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.probes.mtu, "echo 1500");
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[datastore]\nredis_port = \"not a port\"").unwrap();
        assert!(IfsyncConfig::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = IfsyncConfig::load_or_default("/nonexistent/ifsyncd.toml").unwrap();
        assert_eq!(config, IfsyncConfig::default());
    }
}
