use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::model::game_state::GameState;
use crate::model::save_record::SaveMetadata;
use crate::store::codec::decompress_state;
use crate::store::error::StoreError;
use crate::store::local::LocalStore;
use crate::store::sync::{local_only, reconcile, SaveEntry};
use crate::store::{Identity, SaveStore};

/// Front door for persistence. Writes go local first, the remote mirror is
/// kept up to date on background threads while a player is signed in.
pub struct SaveManager {
    local: Arc<LocalStore>,
    remote: Option<Arc<dyn SaveStore>>,
    identity: Option<Identity>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped on every sign-in and sign-out. Copies started under an older
    /// identity leave the cloud cache alone.
    generation: Arc<AtomicU64>,
}

/// What a background copy needs to know about the identity it ran under.
struct CopyScope {
    user_id: String,
    started: u64,
    generation: Arc<AtomicU64>,
}

impl CopyScope {
    fn still_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.started
    }

    fn cache_entry(&self, local: &LocalStore, meta: &SaveMetadata) -> Result<(), StoreError> {
        if !self.still_current() {
            log::debug!("identity changed, not caching {}", meta.id);
            return Ok(());
        }
        local.cache_remote_entry(&self.user_id, meta)
    }
}

impl SaveManager {
    pub fn new(local: Arc<LocalStore>, remote: Option<Arc<dyn SaveStore>>) -> Self {
        Self {
            local,
            remote,
            identity: None,
            tasks: Mutex::new(Vec::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn signed_in(&self) -> Option<(Arc<dyn SaveStore>, String)> {
        let remote = self.remote.as_ref()?;
        let identity = self.identity.as_ref()?;
        Some((Arc::clone(remote), identity.user_id.clone()))
    }

    pub fn sign_in(&mut self, identity: Identity) -> Result<(), StoreError> {
        let Some(remote) = &self.remote else {
            return Err(StoreError::Remote("no remote store configured".into()));
        };
        log::info!("signed in as {}", identity.user_id);
        self.generation.fetch_add(1, Ordering::SeqCst);
        remote.set_identity(Some(identity.clone()));
        self.identity = Some(identity);
        Ok(())
    }

    /// Drops the identity and every cached remote listing. Local saves stay.
    /// Copies still in flight finish on their own but no longer touch the
    /// cache.
    pub fn sign_out(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(remote) = &self.remote {
            remote.set_identity(None);
        }
        if let Some(identity) = self.identity.take() {
            log::info!("signed out {}", identity.user_id);
        }
        if let Err(e) = self.local.clear_remote_cache() {
            log::warn!("failed to purge cloud cache: {e}");
        }
    }

    /// Block until copies queued by earlier passes have finished.
    pub fn wait_for_sync(&self) {
        let pending: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in pending {
            if handle.join().is_err() {
                log::error!("sync task panicked");
            }
        }
    }

    /// True while copies queued by an earlier pass are still running.
    pub fn sync_in_flight(&self) -> bool {
        self.tasks.lock().iter().any(|h| !h.is_finished())
    }

    fn scope(&self, user_id: String) -> CopyScope {
        CopyScope {
            user_id,
            started: self.generation.load(Ordering::SeqCst),
            generation: Arc::clone(&self.generation),
        }
    }

    fn spawn_task(&self, task: impl FnOnce() + Send + 'static) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(thread::spawn(task));
    }

    fn queue_upload(&self, remote: Arc<dyn SaveStore>, user_id: String, id: String) {
        let local = Arc::clone(&self.local);
        let scope = self.scope(user_id);
        self.spawn_task(move || {
            if let Err(e) = upload(&local, remote.as_ref(), &scope, &id) {
                log::warn!("upload of {id} failed: {e}");
            }
        });
    }

    fn queue_download(&self, remote: Arc<dyn SaveStore>, user_id: String, id: String) {
        let local = Arc::clone(&self.local);
        let scope = self.scope(user_id);
        self.spawn_task(move || {
            if let Err(e) = download(&local, remote.as_ref(), &scope, &id) {
                log::warn!("download of {id} failed: {e}");
            }
        });
    }

    /// Merged listing. While signed in this also queues the copies needed to
    /// bring both sides together. Never waits on earlier copies: while a pass
    /// is still running the view is built from the cached remote listing and
    /// nothing new is queued.
    pub fn list_saves(&self) -> Result<Vec<SaveEntry>, StoreError> {
        let local = self.local.list()?;

        let Some((remote, user_id)) = self.signed_in() else {
            return Ok(local_only(&local));
        };

        if self.sync_in_flight() {
            log::debug!("sync pass still running, listing from cache");
            let cached = self.local.cached_remote_list(&user_id);
            return Ok(reconcile(&local, &cached).merged);
        }

        let remote_list = match remote.list() {
            Ok(list) => list,
            Err(e) => {
                log::warn!("remote listing failed, showing cached copy: {e}");
                let cached = self.local.cached_remote_list(&user_id);
                return Ok(reconcile(&local, &cached).merged);
            }
        };
        if let Err(e) = self.local.cache_remote_list(&user_id, &remote_list) {
            log::warn!("failed to cache remote listing: {e}");
        }

        let plan = reconcile(&local, &remote_list);
        log::debug!(
            "sync pass: {} saves, {} uploads, {} downloads",
            plan.merged.len(),
            plan.uploads.len(),
            plan.downloads.len()
        );
        for id in plan.uploads {
            self.queue_upload(Arc::clone(&remote), user_id.clone(), id);
        }
        for id in plan.downloads {
            self.queue_download(Arc::clone(&remote), user_id.clone(), id);
        }
        Ok(plan.merged)
    }

    /// Local write first; the upload happens in the background.
    pub fn save(&self, state: &GameState, id: Option<&str>) -> Result<SaveMetadata, StoreError> {
        let meta = self.local.save(state, id)?;
        if let Some((remote, user_id)) = self.signed_in() {
            self.queue_upload(remote, user_id, meta.id.clone());
        }
        Ok(meta)
    }

    /// Local copy first. A missing or unreadable local copy is served from
    /// the remote store when signed in, and written back locally.
    pub fn load(&self, id: &str) -> Result<GameState, StoreError> {
        let local_err = match self.local.load_full(id) {
            Ok(state) => return Ok(state),
            Err(e) => e,
        };
        if !local_err.allows_remote_fallback() {
            return Err(local_err);
        }
        let Some((remote, user_id)) = self.signed_in() else {
            return Err(local_err);
        };

        log::info!("loading {id} from remote ({local_err})");
        let mut record = remote.fetch_record(id)?;
        let state = decompress_state(&record.game_state)?;

        record.meta.cloud_synced = true;
        record.meta.user_id = None;
        if let Err(e) = self.local.put_record(&record) {
            log::warn!("failed to backfill local copy of {id}: {e}");
        } else if let Err(e) = self.local.cache_remote_entry(&user_id, &record.meta) {
            log::warn!("failed to cache {id}: {e}");
        }
        Ok(state)
    }

    /// Removes the save everywhere it exists. Only fails when every store
    /// that was asked failed.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let local_result = self.local.delete(id);

        let Some((remote, _)) = self.signed_in() else {
            return local_result;
        };
        let remote_result = remote.delete(id);
        if let Err(e) = self.local.uncache_remote_entry(id) {
            log::warn!("failed to drop {id} from cloud cache: {e}");
        }

        match (local_result, remote_result) {
            (Err(local), Err(remote)) => {
                log::warn!("remote delete of {id} failed: {remote}");
                Err(local)
            }
            (Ok(()), Err(e)) => {
                log::warn!("remote delete of {id} failed: {e}");
                Ok(())
            }
            (Err(e), Ok(())) => {
                log::warn!("local delete of {id} failed: {e}");
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

fn upload(local: &LocalStore, remote: &dyn SaveStore, scope: &CopyScope, id: &str) -> Result<(), StoreError> {
    let record = local.fetch_record(id)?;
    remote.put_record(&record)?;
    local.mark_synced(id, record.meta.created_at)?;
    scope.cache_entry(local, &record.meta)?;
    log::debug!("uploaded {id}");
    Ok(())
}

fn download(local: &LocalStore, remote: &dyn SaveStore, scope: &CopyScope, id: &str) -> Result<(), StoreError> {
    let mut record = remote.fetch_record(id)?;

    // A save made locally after the listing was taken wins.
    if let Ok(current) = local.fetch_record(id) {
        if current.meta.created_at > record.meta.created_at {
            log::debug!("skipping download of {id}, local copy is newer");
            return Ok(());
        }
    }

    record.meta.cloud_synced = true;
    record.meta.user_id = None;
    local.put_record(&record)?;
    scope.cache_entry(local, &record.meta)?;
    log::debug!("downloaded {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::game_state::GameStatus;
    use crate::model::save_record::SaveRecord;
    use crate::store::build_record;
    use crate::store::sync::SyncState;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;
    use std::time::{Duration as StdDuration, Instant};
    use tempfile::TempDir;

    /// In-memory stand-in for the remote table.
    #[derive(Default)]
    struct MemoryRemote {
        rows: Mutex<HashMap<String, SaveRecord>>,
        identity: Mutex<Option<Identity>>,
        offline: Mutex<bool>,
        upload_delay: Mutex<StdDuration>,
    }

    impl MemoryRemote {
        fn guard(&self) -> Result<(), StoreError> {
            if *self.offline.lock() {
                return Err(StoreError::Remote("offline".into()));
            }
            if self.identity.lock().is_none() {
                return Err(StoreError::Unauthenticated);
            }
            Ok(())
        }
    }

    impl SaveStore for MemoryRemote {
        fn list(&self) -> Result<Vec<SaveMetadata>, StoreError> {
            self.guard()?;
            Ok(self.rows.lock().values().map(|r| r.meta.clone()).collect())
        }

        fn fetch_record(&self, id: &str) -> Result<SaveRecord, StoreError> {
            self.guard()?;
            self.rows
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.into()))
        }

        fn put_record(&self, record: &SaveRecord) -> Result<(), StoreError> {
            self.guard()?;
            let delay = *self.upload_delay.lock();
            thread::sleep(delay);
            self.rows.lock().insert(record.id().into(), record.clone());
            Ok(())
        }

        fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.guard()?;
            self.rows.lock().remove(id);
            Ok(())
        }

        fn set_identity(&self, identity: Option<Identity>) {
            *self.identity.lock() = identity;
        }
    }

    struct Fixture {
        _dir: TempDir,
        local: Arc<LocalStore>,
        remote: Arc<MemoryRemote>,
        manager: SaveManager,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalStore::open(dir.path(), 10).unwrap());
        let remote = Arc::new(MemoryRemote::default());
        let manager = SaveManager::new(
            Arc::clone(&local),
            Some(Arc::clone(&remote) as Arc<dyn SaveStore>),
        );
        Fixture {
            _dir: dir,
            local,
            remote,
            manager,
        }
    }

    fn alice() -> Identity {
        Identity {
            user_id: "alice".into(),
            access_token: "token".into(),
        }
    }

    fn state(turn: u32) -> GameState {
        GameState {
            status: GameStatus::Playing,
            role: "Researcher".into(),
            turn_count: turn,
            ..GameState::default()
        }
    }

    #[test]
    fn signed_out_saves_stay_local() {
        let f = fixture();
        let meta = f.manager.save(&state(1), None).unwrap();
        f.manager.wait_for_sync();

        assert!(f.remote.rows.lock().is_empty());
        let listed = f.manager.list_saves().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].meta.id, meta.id);
        assert_eq!(listed[0].sync, SyncState::LocalOnly);
    }

    #[test]
    fn save_uploads_in_background() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        let meta = f.manager.save(&state(2), None).unwrap();
        f.manager.wait_for_sync();

        assert!(f.remote.rows.lock().contains_key(&meta.id));
        assert!(f.local.fetch_record(&meta.id).unwrap().meta.cloud_synced);
    }

    #[test]
    fn listing_pulls_remote_only_saves() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        let record = build_record(&state(7), Some("from-other-device"), Utc::now()).unwrap();
        f.remote.put_record(&record).unwrap();

        let listed = f.manager.list_saves().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].sync, SyncState::PendingDownload);

        f.manager.wait_for_sync();
        assert_eq!(f.local.load_full("from-other-device").unwrap().turn_count, 7);
    }

    #[test]
    fn listing_pushes_newer_local_copy() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        let old = build_record(&state(1), Some("slot"), Utc::now() - Duration::seconds(60)).unwrap();
        f.remote.put_record(&old).unwrap();
        f.local.save(&state(9), Some("slot")).unwrap();

        let listed = f.manager.list_saves().unwrap();
        assert_eq!(listed[0].sync, SyncState::PendingUpload);
        f.manager.wait_for_sync();

        let row = f.remote.fetch_record("slot").unwrap();
        assert_eq!(decompress_state(&row.game_state).unwrap().turn_count, 9);
    }

    #[test]
    fn load_falls_back_to_remote_and_backfills() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        let record = build_record(&state(4), Some("cloud-only"), Utc::now()).unwrap();
        f.remote.put_record(&record).unwrap();

        assert_eq!(f.manager.load("cloud-only").unwrap().turn_count, 4);
        assert!(f.local.contains("cloud-only"));
    }

    #[test]
    fn missing_everywhere_is_not_found() {
        let mut f = fixture();
        assert!(matches!(f.manager.load("ghost"), Err(StoreError::NotFound(_))));
        f.manager.sign_in(alice()).unwrap();
        assert!(matches!(f.manager.load("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn delete_succeeds_when_one_side_lacks_the_record() {
        let mut f = fixture();
        let meta = f.manager.save(&state(1), None).unwrap();
        f.manager.sign_in(alice()).unwrap();

        f.manager.delete(&meta.id).unwrap();
        assert!(!f.local.contains(&meta.id));
        f.manager.delete(&meta.id).unwrap();
    }

    #[test]
    fn remote_outage_falls_back_to_cached_listing() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        let record = build_record(&state(3), Some("cached"), Utc::now()).unwrap();
        f.remote.put_record(&record).unwrap();
        f.manager.list_saves().unwrap();
        f.manager.wait_for_sync();

        *f.remote.offline.lock() = true;
        let listed = f.manager.list_saves().unwrap();
        assert!(listed.iter().any(|e| e.meta.id == "cached"));
    }

    #[test]
    fn sign_out_purges_cache_and_keeps_local_saves() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        let meta = f.manager.save(&state(1), None).unwrap();
        f.manager.wait_for_sync();
        assert!(!f.local.cached_remote_list("alice").is_empty());

        f.manager.sign_out();
        assert!(f.local.cached_remote_list("alice").is_empty());
        assert!(f.manager.identity().is_none());
        assert!(f.local.contains(&meta.id));
    }

    #[test]
    fn listing_does_not_wait_for_slow_uploads() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        *f.remote.upload_delay.lock() = StdDuration::from_secs(2);
        let meta = f.manager.save(&state(5), None).unwrap();
        assert!(f.manager.sync_in_flight());

        let started = Instant::now();
        let listed = f.manager.list_saves().unwrap();
        assert!(started.elapsed() < StdDuration::from_millis(500));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].meta.id, meta.id);
        assert_eq!(listed[0].sync, SyncState::PendingUpload);

        f.manager.wait_for_sync();
        assert!(f.remote.rows.lock().contains_key(&meta.id));
    }

    #[test]
    fn sign_out_during_upload_leaves_cache_empty() {
        let mut f = fixture();
        f.manager.sign_in(alice()).unwrap();
        *f.remote.upload_delay.lock() = StdDuration::from_millis(300);
        let meta = f.manager.save(&state(1), None).unwrap();

        let started = Instant::now();
        f.manager.sign_out();
        assert!(started.elapsed() < StdDuration::from_millis(200));

        f.manager.wait_for_sync();
        assert!(f.local.cached_remote_list("alice").is_empty());
        assert!(f.local.contains(&meta.id));
    }
}
