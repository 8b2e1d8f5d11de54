//! Interface model and datastore value types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Origin of an IPv4 address configuration (ietf-ip `ip-address-origin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Static,
    Dhcp,
    /// Unset or anything the store cannot express.
    #[default]
    Other,
}

impl Origin {
    /// Parse an ietf-ip enumeration value. Unknown values map to `Other`.
    pub fn from_yang(s: &str) -> Self {
        match s {
            "static" => Origin::Static,
            "dhcp" => Origin::Dhcp,
            _ => Origin::Other,
        }
    }

    /// The ietf-ip enumeration value.
    pub fn as_yang(&self) -> &'static str {
        match self {
            Origin::Static => "static",
            Origin::Dhcp => "dhcp",
            Origin::Other => "other",
        }
    }

    /// The value of the UCI `proto` option.
    pub fn as_uci_proto(&self) -> &'static str {
        match self {
            Origin::Static => "static",
            Origin::Dhcp => "dhcp",
            Origin::Other => "none",
        }
    }
}

/// IPv4 address with its prefix length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Address {
    /// Dotted-quad string, empty when unknown.
    pub ip: String,
    pub prefix_length: u8,
}

/// IPv4 configuration of one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Config {
    pub enabled: bool,
    pub forwarding: bool,
    pub origin: Origin,
    /// 0 means unset.
    pub mtu: u16,
    pub address: Ipv4Address,
}

impl Default for Ipv4Config {
    fn default() -> Self {
        Self {
            enabled: true,
            forwarding: false,
            origin: Origin::Other,
            mtu: 0,
            address: Ipv4Address::default(),
        }
    }
}

/// Reconciled state of one network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    name: String,

    /// UCI section owning this interface, resolved once at startup.
    section: Option<String>,

    /// Never populated yet.
    pub description: String,

    pub ipv4: Ipv4Config,
}

impl InterfaceRecord {
    /// Create a record with IPv4 defaults (enabled, everything else zeroed).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            section: None,
            description: String::new(),
            ipv4: Ipv4Config::default(),
        }
    }

    /// Interface name. Immutable for the lifetime of the record.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning UCI section, if one was found.
    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    /// Record the owning section. Only the first resolution sticks.
    ///
    /// Returns false if a section was already resolved.
    pub fn resolve_section(&mut self, section: impl Into<String>) -> bool {
        if self.section.is_some() {
            return false;
        }
        self.section = Some(section.into());
        true
    }
}

/// A typed datastore value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DataValue {
    Bool(bool),
    Enum(String),
    IdentityRef(String),
    String(String),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
}

impl DataValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload of enum, identityref and string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Enum(s) | DataValue::IdentityRef(s) | DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned payload widened to 64 bits.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint8(v) => Some(u64::from(*v)),
            DataValue::Uint16(v) => Some(u64::from(*v)),
            DataValue::Uint32(v) => Some(u64::from(*v)),
            DataValue::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.as_u64().and_then(|v| u8::try_from(v).ok())
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.as_u64().and_then(|v| u16::try_from(v).ok())
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Bool(b) => write!(f, "{}", b),
            DataValue::Enum(s) | DataValue::IdentityRef(s) | DataValue::String(s) => {
                write!(f, "{}", s)
            }
            DataValue::Uint8(v) => write!(f, "{}", v),
            DataValue::Uint16(v) => write!(f, "{}", v),
            DataValue::Uint32(v) => write!(f, "{}", v),
            DataValue::Uint64(v) => write!(f, "{}", v),
        }
    }
}

/// A value together with the path it lives at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedValue {
    pub xpath: String,
    pub value: DataValue,
}

impl TypedValue {
    pub fn new(xpath: impl Into<String>, value: DataValue) -> Self {
        Self {
            xpath: xpath.into(),
            value,
        }
    }
}

/// Result of one field-level step of a push, pull or apply batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    /// Pull found a value and stored it in the record.
    Updated,
    /// The source had no usable value; the field kept its previous value.
    NotFound,
    /// Value written.
    Written,
    /// Value was unset and the option was removed.
    Removed,
    /// Field has no writable mapping.
    Skipped,
    /// The read or write failed.
    Failed(String),
}

/// Per-field outcome reported back from a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldOutcome {
    pub interface: String,
    pub field: String,
    pub status: FieldStatus,
}

impl FieldOutcome {
    pub fn new(
        interface: impl Into<String>,
        field: impl Into<String>,
        status: FieldStatus,
    ) -> Self {
        Self {
            interface: interface.into(),
            field: field.into(),
            status,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, FieldStatus::Failed(_))
    }
}

/// Kind of an external change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Verify,
    Apply,
    Abort,
}

impl FromStr for ChangeEvent {
    type Err = String;

    /// Parse a notification kind, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verify" => Ok(ChangeEvent::Verify),
            "apply" => Ok(ChangeEvent::Apply),
            "abort" => Ok(ChangeEvent::Abort),
            other => Err(format!("unrecognized change event: {}", other)),
        }
    }
}

impl ChangeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEvent::Verify => "verify",
            ChangeEvent::Apply => "apply",
            ChangeEvent::Abort => "abort",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_defaults() {
        let record = InterfaceRecord::new("eth0");
        assert_eq!(record.name(), "eth0");
        assert_eq!(record.section(), None);
        assert!(record.description.is_empty());
        assert!(record.ipv4.enabled);
        assert!(!record.ipv4.forwarding);
        assert_eq!(record.ipv4.origin, Origin::Other);
        assert_eq!(record.ipv4.mtu, 0);
        assert!(record.ipv4.address.ip.is_empty());
        assert_eq!(record.ipv4.address.prefix_length, 0);
    }

    #[test]
    fn test_section_resolved_once() {
        let mut record = InterfaceRecord::new("eth0");
        assert!(record.resolve_section("lan"));
        assert!(!record.resolve_section("wan"));
        assert_eq!(record.section(), Some("lan"));
    }

    #[test]
    fn test_origin_mappings() {
        assert_eq!(Origin::from_yang("static"), Origin::Static);
        assert_eq!(Origin::from_yang("dhcp"), Origin::Dhcp);
        assert_eq!(Origin::from_yang("link-layer"), Origin::Other);
        assert_eq!(Origin::Dhcp.as_yang(), "dhcp");
        assert_eq!(Origin::Other.as_uci_proto(), "none");
    }

    #[test]
    fn test_data_value_coercion() {
        assert_eq!(DataValue::Uint16(9000).as_u16(), Some(9000));
        assert_eq!(DataValue::Uint32(9000).as_u16(), Some(9000));
        assert_eq!(DataValue::Uint32(70000).as_u16(), None);
        assert_eq!(DataValue::Uint8(24).as_u8(), Some(24));
        assert_eq!(DataValue::Bool(true).as_u16(), None);
        assert_eq!(DataValue::Enum("dhcp".into()).as_str(), Some("dhcp"));
        assert_eq!(DataValue::String("x".into()).as_bool(), None);
    }

    #[test]
    fn test_data_value_json() {
        let json = serde_json::to_string(&DataValue::Uint16(1500)).unwrap();
        assert_eq!(json, r#"{"type":"uint16","value":1500}"#);
        let back: DataValue =
            serde_json::from_str(r#"{"type":"identityref","value":"x"}"#).unwrap();
        assert_eq!(back, DataValue::IdentityRef("x".into()));
    }

    #[test]
    fn test_change_event_parse() {
        assert_eq!("verify".parse(), Ok(ChangeEvent::Verify));
        assert_eq!(" APPLY\n".parse(), Ok(ChangeEvent::Apply));
        assert_eq!("abort".parse(), Ok(ChangeEvent::Abort));
        assert!("done".parse::<ChangeEvent>().is_err());
    }
}
