use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::model::game_state::GameState;
use crate::model::save_record::{SaveMetadata, SaveRecord};
use crate::store::error::StoreError;
use crate::store::{build_record, SaveStore};

const SAVES_DIR: &str = "saves";
const CLOUD_CACHE_FILE: &str = "cloud_saves.json";

/// One JSON file per save under `<root>/saves`, plus a cached copy of the
/// last remote listing at `<root>/cloud_saves.json`.
pub struct LocalStore {
    saves_dir: PathBuf,
    cache_path: PathBuf,
    max_saves: usize,
    write_lock: Mutex<()>,
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

impl LocalStore {
    pub fn open(root: impl Into<PathBuf>, max_saves: usize) -> Result<Self, StoreError> {
        let root = root.into();
        let saves_dir = root.join(SAVES_DIR);
        fs::create_dir_all(&saves_dir)?;
        log::debug!("local saves at {}", saves_dir.display());

        Ok(Self {
            saves_dir,
            cache_path: root.join(CLOUD_CACHE_FILE),
            max_saves,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        if !valid_id(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.saves_dir.join(format!("{id}.json")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.record_path(id).map(|p| p.exists()).unwrap_or(false)
    }

    /// Flag a record as mirrored remotely, but only if it is still the
    /// version that was mirrored. Returns whether the flag changed.
    pub fn mark_synced(&self, id: &str, version: DateTime<Utc>) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut record = self.fetch_record(id)?;
        if record.meta.created_at != version || record.meta.cloud_synced {
            return Ok(false);
        }
        record.meta.cloud_synced = true;
        write_atomic(&self.record_path(id)?, &serde_json::to_vec(&record)?)?;
        Ok(true)
    }

    // --- remote listing cache -------------------------------------------

    fn read_cache(&self) -> Vec<SaveMetadata> {
        match fs::read_to_string(&self.cache_path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("discarding malformed cloud cache: {e}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    fn write_cache(&self, entries: &[SaveMetadata]) -> Result<(), StoreError> {
        write_atomic(&self.cache_path, &serde_json::to_vec(entries)?)?;
        Ok(())
    }

    /// Replace the cached listing for `user_id`.
    pub fn cache_remote_list(&self, user_id: &str, list: &[SaveMetadata]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries: Vec<SaveMetadata> = self
            .read_cache()
            .into_iter()
            .filter(|m| m.user_id.as_deref() != Some(user_id))
            .collect();
        entries.extend(list.iter().cloned().map(|mut m| {
            m.user_id = Some(user_id.to_string());
            m.cloud_synced = true;
            m
        }));
        self.write_cache(&entries)
    }

    pub fn cache_remote_entry(&self, user_id: &str, meta: &SaveMetadata) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_cache();
        entries.retain(|m| m.id != meta.id);
        let mut meta = meta.clone();
        meta.user_id = Some(user_id.to_string());
        meta.cloud_synced = true;
        entries.push(meta);
        self.write_cache(&entries)
    }

    pub fn uncache_remote_entry(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_cache();
        let before = entries.len();
        entries.retain(|m| m.id != id);
        if entries.len() != before {
            self.write_cache(&entries)?;
        }
        Ok(())
    }

    pub fn cached_remote_list(&self, user_id: &str) -> Vec<SaveMetadata> {
        self.read_cache()
            .into_iter()
            .filter(|m| m.user_id.as_deref() == Some(user_id))
            .collect()
    }

    /// Forget every cached remote row. Local saves are not touched.
    pub fn clear_remote_cache(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.cache_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SaveStore for LocalStore {
    fn list(&self) -> Result<Vec<SaveMetadata>, StoreError> {
        let mut saves = Vec::new();
        for entry in fs::read_dir(&self.saves_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|s| serde_json::from_str::<SaveRecord>(&s).map_err(StoreError::from));
            match parsed {
                Ok(record) => saves.push(record.meta),
                Err(e) => log::warn!("skipping unreadable save {}: {e}", path.display()),
            }
        }
        saves.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(saves)
    }

    fn fetch_record(&self, id: &str) -> Result<SaveRecord, StoreError> {
        let path = self.record_path(id)?;
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|e| StoreError::Corrupt(format!("{id}: {e}")))
    }

    fn put_record(&self, record: &SaveRecord) -> Result<(), StoreError> {
        let path = self.record_path(record.id())?;
        let bytes = serde_json::to_vec(record)?;
        let _guard = self.write_lock.lock();
        write_atomic(&path, &bytes)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = match self.record_path(id) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// New slots are refused once the limit is reached. Overwriting an
    /// existing slot is always allowed.
    fn save(&self, state: &GameState, id: Option<&str>) -> Result<SaveMetadata, StoreError> {
        let overwrite = id.is_some_and(|id| self.contains(id));
        if !overwrite && self.list()?.len() >= self.max_saves {
            return Err(StoreError::QuotaExceeded {
                limit: self.max_saves,
            });
        }

        let record = build_record(state, id, Utc::now())?;
        self.put_record(&record)?;
        log::info!("saved {} ({})", record.id(), record.meta.summary.as_deref().unwrap_or(""));
        Ok(record.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::game_state::{GameStatus, Language, SubjectDescriptor};
    use crate::model::message::Message;
    use tempfile::TempDir;

    fn store(max: usize) -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path(), max).unwrap();
        (dir, store)
    }

    fn played_state() -> GameState {
        let mut reply = Message::narrator_placeholder(2);
        reply.finalize("Статуя шевельнулась. 🗿".into(), Some(62));
        reply.image_url = Some("data:image/png;base64,AAAA".into());
        GameState {
            status: GameStatus::Playing,
            subject: Some(SubjectDescriptor {
                designation: "SCP-173".into(),
                name: "The Sculpture".into(),
                containment_class: "Euclid".into(),
                ..SubjectDescriptor::default()
            }),
            role: "D-Class".into(),
            messages: vec![Message::user("blink", 1), reply],
            stability: 62,
            turn_count: 1,
            language: Some(Language::En),
            ..GameState::default()
        }
    }

    #[test]
    fn save_then_load_is_lossless() {
        let (_dir, store) = store(10);
        let state = played_state();
        let meta = store.save(&state, None).unwrap();

        assert_eq!(store.load_full(&meta.id).unwrap(), state);
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].summary.as_deref(), Some("Turn 1\nSCP-173 - D-Class"));
    }

    #[test]
    fn quota_blocks_new_slots_but_not_overwrites() {
        let (_dir, store) = store(2);
        let state = played_state();
        let first = store.save(&state, None).unwrap();
        store.save(&state, None).unwrap();

        assert!(matches!(
            store.save(&state, None),
            Err(StoreError::QuotaExceeded { limit: 2 })
        ));
        assert!(store.save(&state, Some(&first.id)).is_ok());
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn missing_and_corrupt_are_distinguished() {
        let (dir, store) = store(10);
        assert!(matches!(store.load_full("nope"), Err(StoreError::NotFound(_))));

        fs::write(dir.path().join("saves/broken.json"), "{ not json").unwrap();
        assert!(matches!(store.load_full("broken"), Err(StoreError::Corrupt(_))));
        // unreadable files are left out of listings
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store(10);
        let meta = store.save(&played_state(), None).unwrap();
        store.delete(&meta.id).unwrap();
        store.delete(&meta.id).unwrap();
        assert!(!store.contains(&meta.id));
    }

    #[test]
    fn path_like_ids_are_rejected() {
        let (_dir, store) = store(10);
        assert!(matches!(store.fetch_record("../settings"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn mark_synced_checks_version() {
        let (_dir, store) = store(10);
        let meta = store.save(&played_state(), None).unwrap();

        let stale = meta.created_at - chrono::Duration::seconds(5);
        assert!(!store.mark_synced(&meta.id, stale).unwrap());
        assert!(store.mark_synced(&meta.id, meta.created_at).unwrap());
        assert!(store.fetch_record(&meta.id).unwrap().meta.cloud_synced);
    }

    #[test]
    fn remote_cache_is_scoped_and_purgeable() {
        let (_dir, store) = store(10);
        let meta = store.save(&played_state(), None).unwrap();

        store.cache_remote_list("alice", &[meta.clone()]).unwrap();
        store.cache_remote_entry("bob", &meta).unwrap();
        assert_eq!(store.cached_remote_list("alice").len(), 0);
        assert_eq!(store.cached_remote_list("bob").len(), 1);

        store.clear_remote_cache().unwrap();
        assert!(store.cached_remote_list("bob").is_empty());
        // local saves survive the purge
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
