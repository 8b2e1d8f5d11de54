//! Management datastore access
//!
//! The bridge talks to the datastore through [`Datastore`]: point reads of
//! the running view, staged writes and a commit that publishes them.
//! [`MemoryDatastore`] keeps everything in process and is what the tests
//! reconcile against; the daemon uses the Redis implementation.

use async_trait::async_trait;
use ifsync_common::{IfsyncError, IfsyncResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

use crate::types::{DataValue, TypedValue};

/// Point-addressed access to the management datastore.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Read one item of the running view. `Ok(None)` if the path holds no
    /// value.
    async fn get_item(&self, xpath: &str) -> IfsyncResult<Option<DataValue>>;

    /// Stage one write. It becomes visible on [`Datastore::commit`].
    async fn set_item(&self, xpath: &str, value: DataValue) -> IfsyncResult<()>;

    /// Publish every staged write.
    async fn commit(&self) -> IfsyncResult<()>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    running: BTreeMap<String, DataValue>,
    staged: Vec<(String, DataValue)>,
    set_log: Vec<TypedValue>,
    commits: usize,
    rejected: HashSet<String>,
    unavailable: bool,
}

/// In-process datastore.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    inner: Mutex<MemoryInner>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Datastore whose running view already holds `items`.
    pub fn with_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, DataValue)>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for (xpath, value) in items {
                inner.running.insert(xpath.into(), value);
            }
        }
        store
    }

    /// Put a value straight into the running view, bypassing staging.
    pub fn insert(&self, xpath: impl Into<String>, value: DataValue) {
        self.inner.lock().running.insert(xpath.into(), value);
    }

    /// Make every later write to `xpath` fail.
    pub fn reject_writes_to(&self, xpath: impl Into<String>) {
        self.inner.lock().rejected.insert(xpath.into());
    }

    /// Make every call fail as if the datastore could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    pub fn get(&self, xpath: &str) -> Option<DataValue> {
        self.inner.lock().running.get(xpath).cloned()
    }

    /// Snapshot of the running view.
    pub fn running(&self) -> BTreeMap<String, DataValue> {
        self.inner.lock().running.clone()
    }

    /// Every accepted write, in call order.
    pub fn set_log(&self) -> Vec<TypedValue> {
        self.inner.lock().set_log.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.inner.lock().commits
    }

    fn check_available(inner: &MemoryInner) -> IfsyncResult<()> {
        if inner.unavailable {
            return Err(IfsyncError::datastore("connect", "datastore unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_item(&self, xpath: &str) -> IfsyncResult<Option<DataValue>> {
        let inner = self.inner.lock();
        Self::check_available(&inner)?;
        Ok(inner.running.get(xpath).cloned())
    }

    async fn set_item(&self, xpath: &str, value: DataValue) -> IfsyncResult<()> {
        let mut inner = self.inner.lock();
        Self::check_available(&inner)?;
        if inner.rejected.contains(xpath) {
            return Err(IfsyncError::datastore(
                "set_item",
                format!("write to {} rejected", xpath),
            ));
        }
        inner.set_log.push(TypedValue::new(xpath, value.clone()));
        inner.staged.push((xpath.to_string(), value));
        Ok(())
    }

    async fn commit(&self) -> IfsyncResult<()> {
        let mut inner = self.inner.lock();
        Self::check_available(&inner)?;
        let staged = std::mem::take(&mut inner.staged);
        inner.running.extend(staged);
        inner.commits += 1;
        Ok(())
    }
}
