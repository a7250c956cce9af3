use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use types::{AppId, DepotId, DownloadError, ManifestId};
use utils::lock;

/// Minimum spacing between checkpoint writes during a run. Completion and
/// shutdown flushes bypass the throttle.
const SAVE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepotResume {
    pub manifest_id: ManifestId,
    pub completed_chunk_ids: BTreeSet<String>,
    pub completed_files: BTreeSet<String>,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState {
    pub app_id: AppId,
    pub branch: String,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub depots: BTreeMap<DepotId, DepotResume>,
}

impl ResumeState {
    fn new(app_id: AppId, branch: &str) -> Self {
        let now = Utc::now();
        Self {
            app_id,
            branch: branch.to_string(),
            started_at: now,
            last_updated_at: now,
            depots: BTreeMap::new(),
        }
    }
}

/// JSON checkpoint of completed chunks and files, one per install directory,
/// allowing interrupted downloads to continue. Deleted on overall success.
pub struct ResumeStore {
    path: PathBuf,
    state: Mutex<ResumeState>,
    last_saved: Mutex<Instant>,
}

impl ResumeStore {
    /// Loads the checkpoint, discarding it when it belongs to a different
    /// `(app_id, branch)` run.
    pub fn load_or_create(install_dir: &Path, app_id: AppId, branch: &str) -> Self {
        let path = crate::config_dir(install_dir).join(crate::RESUME_FILE);
        let state = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ResumeState>(&bytes) {
                Ok(state)
                    if state.app_id == app_id && state.branch.eq_ignore_ascii_case(branch) =>
                {
                    debug!("resuming previous download state from {}", path.display());
                    state
                }
                Ok(_) => {
                    debug!("download state belongs to another app or branch, rebuilding");
                    ResumeState::new(app_id, branch)
                }
                Err(e) => {
                    warn!("download state was unreadable, rebuilding: {e}");
                    ResumeState::new(app_id, branch)
                }
            },
            Err(_) => ResumeState::new(app_id, branch),
        };
        Self {
            path,
            state: Mutex::new(state),
            last_saved: Mutex::new(Instant::now() - SAVE_INTERVAL),
        }
    }

    /// Prepares the depot entry for this run. A previous entry is honored
    /// only when it targets the same manifest; otherwise it is discarded.
    pub fn ensure_depot(&self, depot_id: DepotId, manifest_id: ManifestId, total_bytes: u64) {
        let mut state = lock!(self.state);
        let entry = state.depots.entry(depot_id).or_default();
        if entry.manifest_id != manifest_id {
            *entry = DepotResume::default();
            entry.manifest_id = manifest_id;
        }
        entry.total_bytes = total_bytes;
        entry.is_complete = false;
    }

    pub fn is_chunk_complete(&self, depot_id: DepotId, chunk_id: &str) -> bool {
        lock!(self.state)
            .depots
            .get(&depot_id)
            .is_some_and(|d| d.completed_chunk_ids.contains(chunk_id))
    }

    pub fn mark_chunk_complete(&self, depot_id: DepotId, chunk_id: &str, bytes: u64) {
        let mut state = lock!(self.state);
        let entry = state.depots.entry(depot_id).or_default();
        if entry.completed_chunk_ids.insert(chunk_id.to_string()) {
            // bytes_downloaded only ever grows within a run
            entry.bytes_downloaded += bytes;
        }
        drop(state);
        self.save_throttled();
    }

    /// Drops a stale completion claim, e.g. when on-disk validation found
    /// the bytes missing after an interrupted run.
    pub fn clear_chunk(&self, depot_id: DepotId, chunk_id: &str) {
        let mut state = lock!(self.state);
        if let Some(entry) = state.depots.get_mut(&depot_id) {
            entry.completed_chunk_ids.remove(chunk_id);
        }
    }

    pub fn mark_file_complete(&self, depot_id: DepotId, path: &str) {
        let mut state = lock!(self.state);
        let entry = state.depots.entry(depot_id).or_default();
        entry.completed_files.insert(path.to_string());
    }

    pub fn depot_complete(&self, depot_id: DepotId) {
        {
            let mut state = lock!(self.state);
            if let Some(entry) = state.depots.get_mut(&depot_id) {
                entry.is_complete = true;
            }
        }
        self.force_save();
    }

    pub fn save_throttled(&self) {
        {
            let mut last_saved = lock!(self.last_saved);
            if last_saved.elapsed() < SAVE_INTERVAL {
                return;
            }
            *last_saved = Instant::now();
        }
        self.write_to_disk();
    }

    pub fn force_save(&self) {
        *lock!(self.last_saved) = Instant::now();
        self.write_to_disk();
    }

    fn write_to_disk(&self) {
        let json = {
            let mut state = lock!(self.state);
            state.last_updated_at = Utc::now();
            serde_json::to_vec_pretty(&*state)
        };
        let result: Result<(), DownloadError> = (|| {
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&self.path, json.map_err(std::io::Error::other)?)?;
            Ok(())
        })();
        if let Err(e) = result {
            // checkpoint loss is recoverable; never fail the download over it
            warn!("failed to write download state: {e}");
        }
    }

    /// Removes the checkpoint after a fully successful run.
    pub fn delete(&self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("failed to remove download state: {e}");
        }
    }
}
