//! Interface Registry - ordered run-time model of every interface
//!
//! Records are appended once during enumeration and never removed or
//! renamed. Insertion rejects a name that is already present, so the
//! registry never holds two records for one interface.

use ifsync_common::{IfsyncError, IfsyncResult};
use tracing::warn;

use crate::types::InterfaceRecord;

/// Ordered collection of interface records, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct InterfaceRegistry {
    records: Vec<InterfaceRecord>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Fails if the name is empty or already registered.
    pub fn insert(&mut self, record: InterfaceRecord) -> IfsyncResult<()> {
        if record.name().is_empty() {
            return Err(IfsyncError::internal("interface record without a name"));
        }
        if self.contains(record.name()) {
            warn!(interface = %record.name(), "Ignoring duplicate interface");
            return Err(IfsyncError::duplicate_interface(record.name()));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&InterfaceRecord> {
        self.records.iter().find(|r| r.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut InterfaceRecord> {
        self.records.iter_mut().find(|r| r.name() == name)
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &InterfaceRecord> {
        self.records.iter()
    }

    /// Interface names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
