pub mod codec;
pub mod error;
pub mod local;
pub mod manager;
pub mod remote;
pub mod sync;
pub mod thumbnail;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::game_state::GameState;
use crate::model::save_record::{SaveMetadata, SaveRecord};
use crate::store::codec::{compress_state, decompress_state};
use crate::store::error::StoreError;

/// An authenticated player, as handed over by the sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub access_token: String,
}

/// Common surface of the local and remote stores.
///
/// `delete` succeeds when the record is already gone.
pub trait SaveStore: Send + Sync {
    fn list(&self) -> Result<Vec<SaveMetadata>, StoreError>;

    fn fetch_record(&self, id: &str) -> Result<SaveRecord, StoreError>;

    fn put_record(&self, record: &SaveRecord) -> Result<(), StoreError>;

    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Stores that act on behalf of a player get told who that is.
    fn set_identity(&self, _identity: Option<Identity>) {}

    fn save(&self, state: &GameState, id: Option<&str>) -> Result<SaveMetadata, StoreError> {
        let record = build_record(state, id, Utc::now())?;
        self.put_record(&record)?;
        Ok(record.meta)
    }

    fn load_full(&self, id: &str) -> Result<GameState, StoreError> {
        let record = self.fetch_record(id)?;
        decompress_state(&record.game_state)
    }
}

/// Snapshot `state` into a record stamped `now`. A missing id mints a new one.
pub fn build_record(
    state: &GameState,
    id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SaveRecord, StoreError> {
    let payload = compress_state(state)?;
    let id = id
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(SaveRecord {
        meta: SaveMetadata {
            id,
            created_at: now,
            summary: Some(state.save_summary()),
            turn_count: Some(state.turn_count),
            background_thumbnail: thumbnail::thumbnail_or_none(state.background_image.as_deref()),
            cloud_synced: false,
            user_id: None,
        },
        game_state: serde_json::to_value(payload)?,
    })
}
