//! Datastore Bridge - pull records from and push records to the datastore
//!
//! Pull and push never stop at the first failing field. Each field is
//! reported on its own and the batch carries on.

use tracing::{debug, instrument, warn};

use crate::datastore::Datastore;
use crate::tables::{if_fields, ipv4_fields, ETHERNET_CSMACD};
use crate::types::{DataValue, FieldOutcome, FieldStatus, InterfaceRecord, Origin, TypedValue};
use crate::xpath;

/// Field label used in reports for the transaction commit.
pub const COMMIT_FIELD: &str = "commit";

/// Read one item and convert it. A missing value, a value of the wrong
/// type or a failed read all leave the caller's field untouched.
async fn read_field<T>(
    ds: &dyn Datastore,
    interface: &str,
    field: &str,
    path: &str,
    convert: impl FnOnce(&DataValue) -> Option<T>,
) -> (Option<T>, FieldOutcome) {
    let (value, status) = match ds.get_item(path).await {
        Ok(Some(raw)) => match convert(&raw) {
            Some(v) => (Some(v), FieldStatus::Updated),
            None => {
                debug!(
                    xpath = %path,
                    value = %raw,
                    "Unexpected value type, keeping previous value"
                );
                (None, FieldStatus::NotFound)
            }
        },
        Ok(None) => {
            debug!(xpath = %path, "No value in datastore");
            (None, FieldStatus::NotFound)
        }
        Err(e) => {
            warn!(xpath = %path, error = %e, "Datastore read failed");
            (None, FieldStatus::Failed(e.to_string()))
        }
    };
    (value, FieldOutcome::new(interface, field, status))
}

/// Refresh `record` from the running view of the datastore.
///
/// Reads enabled, forwarding, origin and MTU, then the `ip` and
/// `prefix-length` of the address entry keyed by the address the record
/// held before this pull.
#[instrument(skip_all, fields(interface = %record.name()))]
pub async fn pull(ds: &dyn Datastore, record: &mut InterfaceRecord) -> Vec<FieldOutcome> {
    let name = record.name().to_string();
    let mut outcomes = Vec::with_capacity(6);

    let path = xpath::ipv4(&name, ipv4_fields::ENABLED);
    let (value, outcome) =
        read_field(ds, &name, ipv4_fields::ENABLED, &path, DataValue::as_bool).await;
    if let Some(v) = value {
        record.ipv4.enabled = v;
    }
    outcomes.push(outcome);

    let path = xpath::ipv4(&name, ipv4_fields::FORWARDING);
    let (value, outcome) =
        read_field(ds, &name, ipv4_fields::FORWARDING, &path, DataValue::as_bool).await;
    if let Some(v) = value {
        record.ipv4.forwarding = v;
    }
    outcomes.push(outcome);

    let path = xpath::ipv4(&name, ipv4_fields::ORIGIN);
    let (value, outcome) = read_field(ds, &name, ipv4_fields::ORIGIN, &path, |v| {
        v.as_str().map(Origin::from_yang)
    })
    .await;
    if let Some(v) = value {
        record.ipv4.origin = v;
    }
    outcomes.push(outcome);

    let path = xpath::ipv4(&name, ipv4_fields::MTU);
    let (value, outcome) = read_field(ds, &name, ipv4_fields::MTU, &path, DataValue::as_u16).await;
    if let Some(v) = value {
        record.ipv4.mtu = v;
    }
    outcomes.push(outcome);

    // Both address reads are keyed by the pre-pull address.
    let key_ip = record.ipv4.address.ip.clone();

    let path = xpath::ipv4_address(&name, &key_ip, ipv4_fields::IP);
    let (value, outcome) = read_field(ds, &name, ipv4_fields::IP, &path, |v| {
        v.as_str().map(str::to_string)
    })
    .await;
    if let Some(v) = value {
        record.ipv4.address.ip = v;
    }
    outcomes.push(outcome);

    let path = xpath::ipv4_address(&name, &key_ip, ipv4_fields::PREFIX_LENGTH);
    let (value, outcome) =
        read_field(ds, &name, ipv4_fields::PREFIX_LENGTH, &path, DataValue::as_u8).await;
    if let Some(v) = value {
        record.ipv4.address.prefix_length = v;
    }
    outcomes.push(outcome);

    outcomes
}

/// The four values push writes for `record`.
pub fn push_values(record: &InterfaceRecord) -> [TypedValue; 4] {
    let name = record.name();
    [
        TypedValue::new(
            xpath::interface(name, if_fields::TYPE),
            DataValue::IdentityRef(ETHERNET_CSMACD.to_string()),
        ),
        TypedValue::new(
            xpath::ipv4(name, ipv4_fields::FORWARDING),
            DataValue::Bool(record.ipv4.forwarding),
        ),
        TypedValue::new(
            xpath::ipv4(name, ipv4_fields::MTU),
            DataValue::Uint16(record.ipv4.mtu),
        ),
        TypedValue::new(
            xpath::ipv4(name, ipv4_fields::ENABLED),
            DataValue::Bool(record.ipv4.enabled),
        ),
    ]
}

/// Write `record` into the running view and commit once.
///
/// Section, origin and address are never pushed.
#[instrument(skip_all, fields(interface = %record.name()))]
pub async fn push(ds: &dyn Datastore, record: &InterfaceRecord) -> Vec<FieldOutcome> {
    let mut outcomes = Vec::with_capacity(5);

    for item in push_values(record) {
        let field = xpath::node_name(&item.xpath).unwrap_or_default().to_string();
        let status = match ds.set_item(&item.xpath, item.value.clone()).await {
            Ok(()) => FieldStatus::Written,
            Err(e) => {
                warn!(xpath = %item.xpath, error = %e, "Datastore write rejected");
                FieldStatus::Failed(e.to_string())
            }
        };
        outcomes.push(FieldOutcome::new(record.name(), field, status));
    }

    let status = match ds.commit().await {
        Ok(()) => FieldStatus::Written,
        Err(e) => {
            warn!(error = %e, "Datastore commit failed");
            FieldStatus::Failed(e.to_string())
        }
    };
    outcomes.push(FieldOutcome::new(record.name(), COMMIT_FIELD, status));

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pull_updates_present_fields() {
        let ds = MemoryDatastore::with_items([
            (xpath::ipv4("eth0", "enabled"), DataValue::Bool(false)),
            (xpath::ipv4("eth0", "origin"), DataValue::Enum("dhcp".into())),
            (xpath::ipv4("eth0", "mtu"), DataValue::Uint16(9000)),
        ]);
        let mut record = InterfaceRecord::new("eth0");
        record.ipv4.forwarding = true;

        let outcomes = pull(&ds, &mut record).await;

        assert!(!record.ipv4.enabled);
        assert!(record.ipv4.forwarding);
        assert_eq!(record.ipv4.origin, Origin::Dhcp);
        assert_eq!(record.ipv4.mtu, 9000);
        assert_eq!(outcomes.len(), 6);
        let updated = outcomes
            .iter()
            .filter(|o| o.status == FieldStatus::Updated)
            .count();
        assert_eq!(updated, 3);
    }

    #[tokio::test]
    async fn test_pull_wrong_type_keeps_value() {
        let ds = MemoryDatastore::with_items([
            (xpath::ipv4("eth0", "mtu"), DataValue::String("jumbo".into())),
            (xpath::ipv4("eth0", "enabled"), DataValue::Uint8(0)),
        ]);
        let mut record = InterfaceRecord::new("eth0");
        record.ipv4.mtu = 1500;

        pull(&ds, &mut record).await;
        assert_eq!(record.ipv4.mtu, 1500);
        assert!(record.ipv4.enabled);
    }

    #[tokio::test]
    async fn test_pull_address_keyed_by_prior_ip() {
        let ds = MemoryDatastore::with_items([
            (
                xpath::ipv4_address("eth0", "10.0.0.1", "ip"),
                DataValue::String("10.0.0.2".into()),
            ),
            (
                xpath::ipv4_address("eth0", "10.0.0.1", "prefix-length"),
                DataValue::Uint8(16),
            ),
            (
                xpath::ipv4_address("eth0", "10.0.0.2", "prefix-length"),
                DataValue::Uint8(30),
            ),
        ]);
        let mut record = InterfaceRecord::new("eth0");
        record.ipv4.address.ip = "10.0.0.1".into();
        record.ipv4.address.prefix_length = 8;

        pull(&ds, &mut record).await;
        assert_eq!(record.ipv4.address.ip, "10.0.0.2");
        assert_eq!(record.ipv4.address.prefix_length, 16);
    }

    #[tokio::test]
    async fn test_pull_unavailable_reports_failures() {
        let ds = MemoryDatastore::new();
        ds.set_unavailable(true);
        let mut record = InterfaceRecord::new("eth0");
        record.ipv4.mtu = 1500;

        let outcomes = pull(&ds, &mut record).await;
        assert!(outcomes.iter().all(FieldOutcome::is_failure));
        assert_eq!(record.ipv4.mtu, 1500);
    }

    #[tokio::test]
    async fn test_push_four_fields_one_commit() {
        let ds = MemoryDatastore::new();
        let mut record = InterfaceRecord::new("eth0");
        record.ipv4.mtu = 1500;
        record.ipv4.origin = Origin::Static;
        record.ipv4.address.ip = "10.0.0.1".into();

        let outcomes = push(&ds, &record).await;

        let fields: Vec<_> = outcomes.iter().map(|o| o.field.as_str()).collect();
        assert_eq!(fields, vec!["type", "forwarding", "mtu", "enabled", "commit"]);
        assert_eq!(ds.commit_count(), 1);

        let running = ds.running();
        assert_eq!(running.len(), 4);
        assert_eq!(
            running.get(&xpath::interface("eth0", "type")),
            Some(&DataValue::IdentityRef("iana-if-type:ethernetCsmacd".into()))
        );
        assert_eq!(
            running.get(&xpath::ipv4("eth0", "mtu")),
            Some(&DataValue::Uint16(1500))
        );
    }

    #[tokio::test]
    async fn test_push_rejected_field_does_not_block() {
        let ds = MemoryDatastore::new();
        ds.reject_writes_to(xpath::ipv4("eth0", "forwarding"));
        let record = InterfaceRecord::new("eth0");

        let outcomes = push(&ds, &record).await;
        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(|o| o.field.as_str())
            .collect();
        assert_eq!(failed, vec!["forwarding"]);
        assert_eq!(ds.set_log().len(), 3);
        assert_eq!(ds.commit_count(), 1);
    }
}
