//! Redis binding of the management datastore
//!
//! The running view lives in one hash (`xpath -> JSON value`). Writes are
//! staged in memory and flushed with a single `HSET` on commit. Operational
//! answers go to a second hash. Change notifications and operational
//! queries arrive over pub/sub.

use async_trait::async_trait;
use futures::StreamExt;
use ifsync_common::{IfsyncError, IfsyncResult};
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use tracing::{debug, info, instrument, warn};

use crate::config_file::DatastoreConfig;
use crate::datastore::Datastore;
use crate::types::{ChangeEvent, DataValue, TypedValue};

fn redis_err(operation: &str) -> impl Fn(redis::RedisError) -> IfsyncError + '_ {
    move |e| IfsyncError::datastore(operation, e.to_string())
}

/// Decode a stored value. Anything that is not a valid encoded
/// [`DataValue`] reads as absent.
pub fn decode_value(xpath: &str, raw: &str) -> Option<DataValue> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(xpath, error = %e, "Undecodable datastore value");
            None
        }
    }
}

pub fn encode_value(value: &DataValue) -> IfsyncResult<String> {
    serde_json::to_string(value).map_err(|e| IfsyncError::datastore("encode", e.to_string()))
}

/// Redis-backed datastore.
pub struct RedisDatastore {
    conn: ConnectionManager,
    running_key: String,
    operational_key: String,
    staged: Mutex<Vec<(String, String)>>,
}

impl RedisDatastore {
    #[instrument(skip_all, fields(url = %config.redis_url()))]
    pub async fn connect(config: &DatastoreConfig) -> IfsyncResult<Self> {
        debug!("Connecting to Redis");
        let client = Client::open(config.redis_url()).map_err(redis_err("connect"))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(redis_err("connect"))?;
        info!("Connected to Redis datastore");

        Ok(Self {
            conn,
            running_key: config.running_key.clone(),
            operational_key: config.operational_key.clone(),
            staged: Mutex::new(Vec::new()),
        })
    }

    /// Store operational answers.
    pub async fn publish_operational(&self, values: &[TypedValue]) -> IfsyncResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let fields = values
            .iter()
            .map(|v| -> IfsyncResult<(String, String)> {
                Ok((v.xpath.clone(), encode_value(&v.value)?))
            })
            .collect::<IfsyncResult<Vec<_>>>()?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(&self.operational_key, &fields)
            .await
            .map_err(redis_err("publish_operational"))?;
        debug!(count = fields.len(), "Published operational values");
        Ok(())
    }
}

#[async_trait]
impl Datastore for RedisDatastore {
    async fn get_item(&self, xpath: &str) -> IfsyncResult<Option<DataValue>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(&self.running_key, xpath)
            .await
            .map_err(redis_err("get_item"))?;
        Ok(raw.and_then(|raw| decode_value(xpath, &raw)))
    }

    async fn set_item(&self, xpath: &str, value: DataValue) -> IfsyncResult<()> {
        let encoded = encode_value(&value)?;
        self.staged.lock().push((xpath.to_string(), encoded));
        Ok(())
    }

    async fn commit(&self) -> IfsyncResult<()> {
        let staged = std::mem::take(&mut *self.staged.lock());
        if staged.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(&self.running_key, &staged)
            .await
            .map_err(redis_err("commit"))?;
        debug!(count = staged.len(), "Committed staged values");
        Ok(())
    }
}

/// A message received from the datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatastoreMessage {
    Change(ChangeEvent),
    /// Change notification of a kind the engine does not know.
    UnknownChange(String),
    /// Operational query; the payload is the query path.
    OperationalRequest(String),
    /// Message on a channel this daemon did not subscribe to.
    Other { channel: String },
}

/// Channel names the daemon listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub change: String,
    pub oper_request: String,
}

impl From<&DatastoreConfig> for Channels {
    fn from(config: &DatastoreConfig) -> Self {
        Self {
            change: config.change_channel.clone(),
            oper_request: config.oper_request_channel.clone(),
        }
    }
}

impl Channels {
    pub fn classify(&self, channel: &str, payload: &str) -> DatastoreMessage {
        if channel == self.change {
            match payload.parse::<ChangeEvent>() {
                Ok(event) => DatastoreMessage::Change(event),
                Err(_) => DatastoreMessage::UnknownChange(payload.to_string()),
            }
        } else if channel == self.oper_request {
            DatastoreMessage::OperationalRequest(payload.trim().to_string())
        } else {
            DatastoreMessage::Other {
                channel: channel.to_string(),
            }
        }
    }
}

/// Pub/sub subscription to change notifications and operational queries.
pub struct DatastoreSubscription {
    pubsub: PubSub,
    channels: Channels,
}

impl DatastoreSubscription {
    #[instrument(skip_all)]
    pub async fn connect(config: &DatastoreConfig) -> IfsyncResult<Self> {
        let client = Client::open(config.redis_url()).map_err(redis_err("connect"))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(redis_err("connect"))?;

        let channels = Channels::from(config);
        pubsub
            .subscribe(&channels.change)
            .await
            .map_err(redis_err("subscribe"))?;
        pubsub
            .subscribe(&channels.oper_request)
            .await
            .map_err(redis_err("subscribe"))?;
        info!(
            change = %channels.change,
            oper_request = %channels.oper_request,
            "Subscribed to datastore channels"
        );

        Ok(Self { pubsub, channels })
    }

    /// Next message, or `None` once the connection is closed.
    pub async fn next_message(&mut self) -> Option<DatastoreMessage> {
        let channels = &self.channels;
        let mut stream = std::pin::pin!(self.pubsub.on_message());
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name();
            match msg.get_payload::<String>() {
                Ok(payload) => return Some(channels.classify(channel, &payload)),
                Err(e) => warn!(channel, error = %e, "Unreadable message payload"),
            }
        }
        None
    }
}
