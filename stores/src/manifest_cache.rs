use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use types::{DepotId, DownloadError, Manifest, ManifestId, codec, verify};

/// On-disk manifest cache inside the per-tree config directory. Each entry is
/// the serialized manifest plus a sidecar holding the raw 20-byte SHA-1 of
/// those bytes; both are written via temp + rename, manifest first, so a
/// mismatching or missing sidecar always reads as "absent".
pub struct ManifestCache {
    dir: PathBuf,
}

impl ManifestCache {
    pub fn new(install_dir: &Path) -> Self {
        Self {
            dir: crate::config_dir(install_dir),
        }
    }

    fn manifest_path(&self, depot_id: DepotId, manifest_id: ManifestId) -> PathBuf {
        self.dir.join(format!("{depot_id}_{manifest_id}.manifest"))
    }

    fn sidecar_path(&self, depot_id: DepotId, manifest_id: ManifestId) -> PathBuf {
        self.dir
            .join(format!("{depot_id}_{manifest_id}.manifest.sha"))
    }

    fn legacy_path(&self, depot_id: DepotId, manifest_id: ManifestId) -> PathBuf {
        self.dir.join(format!("{depot_id}_{manifest_id}.bin"))
    }

    fn legacy_sidecar_path(&self, depot_id: DepotId, manifest_id: ManifestId) -> PathBuf {
        self.dir.join(format!("{depot_id}_{manifest_id}.sha"))
    }

    /// Loads a cached manifest, falling back to the legacy file layout and
    /// converting it in place. Returns `None` on any integrity failure.
    pub fn load(
        &self,
        depot_id: DepotId,
        manifest_id: ManifestId,
        bad_hash_warning: bool,
    ) -> Option<Manifest> {
        if let Some(manifest) = self.load_verified(
            &self.manifest_path(depot_id, manifest_id),
            &self.sidecar_path(depot_id, manifest_id),
            bad_hash_warning,
        ) {
            return Some(manifest);
        }

        // Legacy layout kept raw payloads next to a separate .sha file.
        let legacy = self.load_verified(
            &self.legacy_path(depot_id, manifest_id),
            &self.legacy_sidecar_path(depot_id, manifest_id),
            bad_hash_warning,
        )?;
        debug!("converting legacy cached manifest {depot_id}_{manifest_id}");
        if let Err(e) = self.store(&legacy) {
            warn!("failed to convert legacy manifest cache entry: {e}");
        } else {
            let _ = fs::remove_file(self.legacy_path(depot_id, manifest_id));
            let _ = fs::remove_file(self.legacy_sidecar_path(depot_id, manifest_id));
        }
        Some(legacy)
    }

    fn load_verified(
        &self,
        manifest_path: &Path,
        sidecar_path: &Path,
        bad_hash_warning: bool,
    ) -> Option<Manifest> {
        let bytes = fs::read(manifest_path).ok()?;
        let expected = fs::read(sidecar_path).ok()?;

        if expected.len() != 20 || verify::sha1_of(&bytes)[..] != expected[..] {
            if bad_hash_warning {
                warn!(
                    "cached manifest {} failed its integrity check, discarding",
                    manifest_path.display()
                );
            }
            let _ = fs::remove_file(manifest_path);
            let _ = fs::remove_file(sidecar_path);
            return None;
        }

        match codec::decode_manifest(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(
                    "cached manifest {} did not decode, discarding: {e}",
                    manifest_path.display()
                );
                let _ = fs::remove_file(manifest_path);
                let _ = fs::remove_file(sidecar_path);
                None
            }
        }
    }

    /// Persists a freshly fetched manifest before it is used.
    pub fn store(&self, manifest: &Manifest) -> Result<(), DownloadError> {
        fs::create_dir_all(&self.dir)?;

        let bytes = codec::encode_manifest(manifest)?;
        let digest = verify::sha1_of(&bytes);

        let manifest_path = self.manifest_path(manifest.depot_id, manifest.manifest_id);
        let sidecar_path = self.sidecar_path(manifest.depot_id, manifest.manifest_id);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(&manifest_path).map_err(|e| e.error)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::io::Write::write_all(&mut tmp, &digest)?;
        tmp.persist(&sidecar_path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{ChunkEntry, FileEntry, FileFlags};

    fn sample_manifest(manifest_id: ManifestId) -> Manifest {
        Manifest {
            depot_id: 731,
            manifest_id,
            creation_time: 1_700_000_000,
            total_compressed: 10,
            total_uncompressed: 12,
            files: vec![FileEntry {
                path: "a.bin".into(),
                total_size: 12,
                hash: [1u8; 20],
                flags: FileFlags::default(),
                link_target: None,
                chunks: vec![ChunkEntry {
                    id: [2u8; 20],
                    offset: 0,
                    uncompressed_length: 12,
                    compressed_length: 10,
                    checksum: 77,
                }],
            }],
        }
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ManifestCache::new(dir.path());
        let manifest = sample_manifest(5);
        cache.store(&manifest).unwrap();
        assert_eq!(cache.load(731, 5, true), Some(manifest));
        assert_eq!(cache.load(731, 6, true), None);
    }

    #[test]
    fn tampered_entry_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ManifestCache::new(dir.path());
        cache.store(&sample_manifest(5)).unwrap();

        let path = cache.manifest_path(731, 5);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert_eq!(cache.load(731, 5, true), None);
        assert!(!path.exists());
    }

    #[test]
    fn legacy_entry_is_converted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ManifestCache::new(dir.path());
        let manifest = sample_manifest(9);

        let bytes = codec::encode_manifest(&manifest).unwrap();
        fs::create_dir_all(&cache.dir).unwrap();
        fs::write(cache.legacy_path(731, 9), &bytes).unwrap();
        fs::write(cache.legacy_sidecar_path(731, 9), verify::sha1_of(&bytes)).unwrap();

        assert_eq!(cache.load(731, 9, true), Some(manifest.clone()));
        assert!(!cache.legacy_path(731, 9).exists());
        assert!(cache.manifest_path(731, 9).exists());
        assert_eq!(cache.load(731, 9, true), Some(manifest));
    }
}
