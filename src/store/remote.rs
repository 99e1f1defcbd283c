use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::save_record::{SaveMetadata, SaveRecord};
use crate::store::error::StoreError;
use crate::store::{Identity, SaveStore};
use crate::ui::settings::RemoteSettings;

const LIST_COLUMNS: &str = "id,created_at,summary,turn_count,background_thumbnail";

/// Row shape of the shared `save_games` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SaveRow {
    id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    turn_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    background_thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    game_state: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl SaveRow {
    fn from_record(record: &SaveRecord, user_id: &str) -> Self {
        Self {
            id: record.meta.id.clone(),
            created_at: record.meta.created_at,
            summary: record.meta.summary.clone(),
            turn_count: record.meta.turn_count,
            background_thumbnail: record.meta.background_thumbnail.clone(),
            game_state: record.game_state.clone(),
            user_id: Some(user_id.to_string()),
        }
    }

    fn into_meta(self) -> (SaveMetadata, serde_json::Value) {
        (
            SaveMetadata {
                id: self.id,
                created_at: self.created_at,
                summary: self.summary,
                turn_count: self.turn_count,
                background_thumbnail: self.background_thumbnail,
                cloud_synced: true,
                user_id: self.user_id,
            },
            self.game_state,
        )
    }
}

/// Per-user saves in a PostgREST table. Row level security on the server
/// scopes every query to the bearer token's owner.
pub struct RemoteStore {
    http: Client,
    table_url: String,
    anon_key: String,
    identity: RwLock<Option<Identity>>,
}

impl RemoteStore {
    pub fn new(settings: &RemoteSettings) -> Result<Self, StoreError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            table_url: format!(
                "{}/rest/v1/{}",
                settings.url.trim_end_matches('/'),
                settings.table
            ),
            anon_key: settings.anon_key.clone(),
            identity: RwLock::new(None),
        })
    }

    fn identity(&self) -> Result<Identity, StoreError> {
        self.identity.read().clone().ok_or(StoreError::Unauthenticated)
    }

    fn authed(&self, req: RequestBuilder, identity: &Identity) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
            .bearer_auth(&identity.access_token)
    }

    fn id_filter(id: &str) -> String {
        format!("id=eq.{}", urlencoding::encode(id))
    }

    fn check(resp: Response) -> Result<Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(StoreError::Unauthenticated);
        }
        let body = resp.text().unwrap_or_default();
        Err(StoreError::Remote(format!("{status}: {body}")))
    }
}

impl SaveStore for RemoteStore {
    fn set_identity(&self, identity: Option<Identity>) {
        *self.identity.write() = identity;
    }

    fn list(&self) -> Result<Vec<SaveMetadata>, StoreError> {
        let identity = self.identity()?;
        let url = format!(
            "{}?select={}&order=created_at.desc",
            self.table_url, LIST_COLUMNS
        );
        let resp = Self::check(self.authed(self.http.get(url), &identity).send()?)?;
        let rows: Vec<SaveRow> = resp.json()?;
        Ok(rows.into_iter().map(|r| r.into_meta().0).collect())
    }

    fn fetch_record(&self, id: &str) -> Result<SaveRecord, StoreError> {
        let identity = self.identity()?;
        let url = format!("{}?select=*&{}", self.table_url, Self::id_filter(id));
        let resp = Self::check(self.authed(self.http.get(url), &identity).send()?)?;
        let rows: Vec<SaveRow> = resp.json()?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let (meta, game_state) = row.into_meta();
        Ok(SaveRecord { meta, game_state })
    }

    fn put_record(&self, record: &SaveRecord) -> Result<(), StoreError> {
        let identity = self.identity()?;
        let row = SaveRow::from_record(record, &identity.user_id);
        let req = self
            .authed(self.http.post(&self.table_url), &identity)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        Self::check(req.send()?)?;
        log::debug!("uploaded save {}", record.id());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let identity = self.identity()?;
        let url = format!("{}?{}", self.table_url, Self::id_filter(id));
        Self::check(self.authed(self.http.delete(url), &identity).send()?)?;
        Ok(())
    }
}
