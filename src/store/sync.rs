use std::collections::HashMap;

use crate::model::save_record::SaveMetadata;

/// Timestamps closer than this count as the same version.
pub const SYNC_TOLERANCE_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    PendingUpload,
    PendingDownload,
    /// Not signed in, nothing to compare against.
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveEntry {
    pub meta: SaveMetadata,
    pub sync: SyncState,
}

/// Result of comparing the two listings: what to show and what to copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncPlan {
    /// Newest first.
    pub merged: Vec<SaveEntry>,
    pub uploads: Vec<String>,
    pub downloads: Vec<String>,
}

/// Compare two versions of the same save.
pub fn classify(local: &SaveMetadata, remote: &SaveMetadata) -> SyncState {
    let delta = local.timestamp_ms() - remote.timestamp_ms();
    if delta.abs() < SYNC_TOLERANCE_MS {
        SyncState::Synced
    } else if delta > 0 {
        SyncState::PendingUpload
    } else {
        SyncState::PendingDownload
    }
}

fn newest_by_id(list: &[SaveMetadata]) -> HashMap<&str, &SaveMetadata> {
    let mut by_id: HashMap<&str, &SaveMetadata> = HashMap::new();
    for meta in list {
        by_id
            .entry(meta.id.as_str())
            .and_modify(|kept| {
                if meta.created_at > kept.created_at {
                    *kept = meta;
                }
            })
            .or_insert(meta);
    }
    by_id
}

fn entry(meta: &SaveMetadata, sync: SyncState) -> SaveEntry {
    let mut meta = meta.clone();
    meta.cloud_synced = sync == SyncState::Synced;
    SaveEntry { meta, sync }
}

fn sort_newest_first(entries: &mut [SaveEntry]) {
    entries.sort_by(|a, b| {
        b.meta
            .created_at
            .cmp(&a.meta.created_at)
            .then_with(|| a.meta.id.cmp(&b.meta.id))
    });
}

/// Every save id appears exactly once in the merged view, and is queued for
/// at most one direction of copy.
pub fn reconcile(local: &[SaveMetadata], remote: &[SaveMetadata]) -> SyncPlan {
    let local_by_id = newest_by_id(local);
    let mut remote_by_id = newest_by_id(remote);
    let mut plan = SyncPlan::default();

    let mut local_ids: Vec<&str> = local_by_id.keys().copied().collect();
    local_ids.sort_unstable();

    for id in local_ids {
        let l = local_by_id[id];
        match remote_by_id.remove(id) {
            Some(r) => match classify(l, r) {
                SyncState::PendingDownload => {
                    plan.downloads.push(id.to_string());
                    plan.merged.push(entry(r, SyncState::PendingDownload));
                }
                state => {
                    if state == SyncState::PendingUpload {
                        plan.uploads.push(id.to_string());
                    }
                    plan.merged.push(entry(l, state));
                }
            },
            None => {
                plan.uploads.push(id.to_string());
                plan.merged.push(entry(l, SyncState::PendingUpload));
            }
        }
    }

    let mut remote_only: Vec<&SaveMetadata> = remote_by_id.into_values().collect();
    remote_only.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    for r in remote_only {
        plan.downloads.push(r.id.clone());
        plan.merged.push(entry(r, SyncState::PendingDownload));
    }

    sort_newest_first(&mut plan.merged);
    plan
}

/// Listing for a signed-out player.
pub fn local_only(local: &[SaveMetadata]) -> Vec<SaveEntry> {
    let mut entries: Vec<SaveEntry> = newest_by_id(local)
        .into_values()
        .map(|m| SaveEntry {
            meta: m.clone(),
            sync: SyncState::LocalOnly,
        })
        .collect();
    sort_newest_first(&mut entries);
    entries
}
