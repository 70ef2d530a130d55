//! WebSocket metadata side-channel.
//!
//! # Data Flow
//! ```text
//! ws-new-meta → MetaStorage::create (fresh id, TTL stamp)
//!     → WebSocket relay writes the remote handshake outcome
//!     → ws-meta reads exactly once and deletes
//!     → reaper sweeps anything the client never collected
//! ```
//!
//! # Design Decisions
//! - The store itself is a pluggable string KV ([`MetaStore`]); the typed
//!   record layer serializes through JSON so any external KV can back it
//! - Atomicity is per key; the relay's post-upgrade write may race a
//!   concurrent `ws-meta` delete, which is acceptable because records are
//!   client-polled and short-lived

mod store;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BareError;
use crate::headers::BareHeaders;
use crate::remote::Remote;

pub use store::{MemoryMetaStore, MetaStore};

/// How long an uncollected record stays alive.
pub const META_TTL: Duration = Duration::from_secs(30);

/// Cadence of the expiry sweep.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// Remote handshake outcome stored for `ws-meta` retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(rename = "statusText", skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    pub headers: BareHeaders,
}

/// Wire form of the remote tuple inside a stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRemote {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub protocol: String,
}

impl From<&Remote> for MetaRemote {
    fn from(remote: &Remote) -> Self {
        Self {
            host: remote.host.clone(),
            port: remote.port,
            path: remote.path.clone(),
            protocol: remote.protocol.as_str().to_string(),
        }
    }
}

/// Version-tagged record payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaValue {
    /// Protocol version that owns this record (1 or 2).
    pub v: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<MetaResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<MetaRemote>,
    #[serde(rename = "sendHeaders", skip_serializing_if = "Option::is_none")]
    pub send_headers: Option<BareHeaders>,
    #[serde(rename = "forwardHeaders", skip_serializing_if = "Option::is_none")]
    pub forward_headers: Option<Vec<String>>,
}

/// A stored record with its expiry stamp (epoch milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRecord {
    pub expires: u128,
    pub value: MetaValue,
}

fn epoch_ms(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis()
}

/// Typed JSON adapter over a pluggable [`MetaStore`].
#[derive(Clone)]
pub struct MetaStorage {
    store: Arc<dyn MetaStore>,
}

impl MetaStorage {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMetaStore::default()))
    }

    /// Insert a fresh record under a new 16-byte hex id.
    pub async fn create(&self, value: MetaValue) -> Result<String, BareError> {
        let id = Uuid::new_v4().simple().to_string();
        let record = MetaRecord {
            expires: epoch_ms(SystemTime::now() + META_TTL),
            value,
        };
        self.store.set(&id, serde_json::to_string(&record)?).await;
        Ok(id)
    }

    /// Read a live record. Expired records are treated as absent.
    pub async fn get(&self, id: &str) -> Result<Option<MetaValue>, BareError> {
        let Some(raw) = self.store.get(id).await else {
            return Ok(None);
        };
        let record: MetaRecord = serde_json::from_str(&raw)?;
        if record.expires < epoch_ms(SystemTime::now()) {
            self.store.delete(id).await;
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    /// Overwrite a record's payload, keeping its original expiry when the
    /// record still exists.
    pub async fn update(&self, id: &str, value: MetaValue) -> Result<(), BareError> {
        let expires = match self.store.get(id).await {
            Some(raw) => serde_json::from_str::<MetaRecord>(&raw)
                .map(|r| r.expires)
                .unwrap_or_else(|_| epoch_ms(SystemTime::now() + META_TTL)),
            None => epoch_ms(SystemTime::now() + META_TTL),
        };
        let record = MetaRecord { expires, value };
        self.store.set(id, serde_json::to_string(&record)?).await;
        Ok(())
    }

    /// Read-and-delete for `ws-meta`. Checks the version tag.
    pub async fn take(&self, id: &str, version: u8) -> Result<Option<MetaValue>, BareError> {
        let Some(value) = self.get(id).await? else {
            return Ok(None);
        };
        if value.v != version {
            return Ok(None);
        }
        self.store.delete(id).await;
        Ok(Some(value))
    }

    /// Delete every expired record. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = epoch_ms(SystemTime::now());
        let mut removed = 0;
        for key in self.store.keys().await {
            let Some(raw) = self.store.get(&key).await else {
                continue;
            };
            let expired = match serde_json::from_str::<MetaRecord>(&raw) {
                Ok(record) => record.expires < now,
                // Unparseable records are garbage; drop them too.
                Err(_) => true,
            };
            if expired && self.store.delete(&key).await {
                removed += 1;
            }
        }
        removed
    }

    /// Background expiry task. Runs until the shutdown signal fires.
    pub fn spawn_reaper(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let storage = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = storage.sweep().await;
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired meta records");
                        }
                        let live = storage.store.keys().await.len();
                        crate::observability::metrics::record_meta_records(live);
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Meta reaper stopping");
                        break;
                    }
                }
            }
        });
    }
}
