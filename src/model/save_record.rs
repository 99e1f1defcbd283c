use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialized and compressed `GameState`, as stored by both stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedPayload {
    pub compressed: bool,
    /// Base64 of zlib-deflated JSON.
    pub data: String,
}

/// Payload-free view of a save, for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub id: String,

    /// Version clock. Re-stamped on every overwrite.
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub turn_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_thumbnail: Option<String>,

    /// Local bookkeeping only. Never sent to the remote store.
    #[serde(default, rename = "is_cloud_synced")]
    pub cloud_synced: bool,

    /// Owner of a cached remote row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SaveMetadata {
    pub fn timestamp_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// A full persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRecord {
    #[serde(flatten)]
    pub meta: SaveMetadata,

    /// Kept as raw JSON so that malformed or legacy rows can still be listed
    /// and only fail when the payload is actually decoded.
    pub game_state: serde_json::Value,
}

impl SaveRecord {
    pub fn id(&self) -> &str {
        &self.meta.id
    }
}
