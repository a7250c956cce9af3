use std::{collections::HashMap, path::Path, path::PathBuf, sync::Mutex};

use bitcode::{Decode, Encode};
use log::warn;
use types::{DepotId, DownloadError, INVALID_MANIFEST_ID, ManifestId};
use utils::lock;

use crate::blob;

#[derive(Debug, Clone, Default, Encode, Decode)]
struct InstalledManifests {
    depots: HashMap<DepotId, ManifestId>,
}

/// Persistent `DepotId -> ManifestId` map for one install directory
/// (`.DepotDownloader/depot.config`). A depot maps to the sentinel while a
/// run is rewriting it; the previous install is treated as invalidated until
/// the new manifest commits.
pub struct InstalledManifestStore {
    path: PathBuf,
    inner: Mutex<InstalledManifests>,
}

impl InstalledManifestStore {
    pub fn load(install_dir: &Path) -> Self {
        let path = crate::config_dir(install_dir).join(crate::DEPOT_CONFIG_FILE);
        let map = match blob::read_blob(&path) {
            Ok(payload) => match bitcode::decode(&payload) {
                Ok(map) => map,
                Err(e) => {
                    warn!("installed manifest map was unreadable, rebuilding: {e}");
                    InstalledManifests::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => InstalledManifests::default(),
            Err(e) => {
                warn!("installed manifest map was unreadable, rebuilding: {e}");
                InstalledManifests::default()
            }
        };
        Self {
            path,
            inner: Mutex::new(map),
        }
    }

    pub fn installed_manifest(&self, depot_id: DepotId) -> Option<ManifestId> {
        lock!(self.inner)
            .depots
            .get(&depot_id)
            .copied()
            .filter(|id| *id != INVALID_MANIFEST_ID)
    }

    /// Marks the depot as mid-rewrite and persists immediately, so a crash
    /// leaves the depot stale rather than trusted.
    pub fn mark_in_progress(&self, depot_id: DepotId) -> Result<(), DownloadError> {
        {
            let mut inner = lock!(self.inner);
            inner.depots.insert(depot_id, INVALID_MANIFEST_ID);
        }
        self.save()
    }

    /// Records the fully validated manifest for a depot. Called only after
    /// every file in the depot has been written and verified.
    pub fn commit(&self, depot_id: DepotId, manifest_id: ManifestId) -> Result<(), DownloadError> {
        {
            let mut inner = lock!(self.inner);
            inner.depots.insert(depot_id, manifest_id);
        }
        self.save()
    }

    fn save(&self) -> Result<(), DownloadError> {
        let payload = {
            let inner = lock!(self.inner);
            bitcode::encode(&*inner)
        };
        blob::write_blob(&self.path, &payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstalledManifestStore::load(dir.path());
        assert_eq!(store.installed_manifest(731), None);

        store.commit(731, 0xabcd).unwrap();
        let reloaded = InstalledManifestStore::load(dir.path());
        assert_eq!(reloaded.installed_manifest(731), Some(0xabcd));
    }

    #[test]
    fn in_progress_reads_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstalledManifestStore::load(dir.path());
        store.commit(731, 7).unwrap();
        store.mark_in_progress(731).unwrap();
        assert_eq!(store.installed_manifest(731), None);

        let reloaded = InstalledManifestStore::load(dir.path());
        assert_eq!(reloaded.installed_manifest(731), None);
    }
}
