//! In-memory session and CDN ports backing the end-to-end tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use depot_engine::{
    AppId, CdnAuthToken, CdnClient, CdnServer, CdnServerType, ChunkEntry, DepotId, DepotKey,
    DownloadError, FileEntry, FileFlags, Manifest, ManifestId, SessionPort, SessionState,
};
use types::app_info::{
    AppCommon, AppInfo, BranchInfo, DepotSection, PackageInfo, PublishedFileDetails, UgcDetails,
};
use types::verify;

pub const TEST_DEPOT_KEY: DepotKey = [0x5au8; 32];

/// Splits file contents into content-addressed chunks and assembles a
/// manifest plus the chunk payload store the mock CDN serves from.
pub fn build_manifest(
    depot_id: DepotId,
    manifest_id: ManifestId,
    files: &[(&str, Vec<u8>, FileFlags)],
    chunk_size: usize,
) -> (Manifest, HashMap<[u8; 20], Vec<u8>>) {
    let mut entries = Vec::new();
    let mut chunk_store = HashMap::new();
    let mut total = 0u64;

    for (path, bytes, flags) in files {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        for piece in bytes.chunks(chunk_size.max(1)) {
            let id = verify::sha1_of(piece);
            chunks.push(ChunkEntry {
                id,
                offset,
                uncompressed_length: piece.len() as u32,
                compressed_length: piece.len() as u32,
                checksum: verify::adler32_of(piece),
            });
            chunk_store.insert(id, piece.to_vec());
            offset += piece.len() as u64;
        }
        total += bytes.len() as u64;
        entries.push(FileEntry {
            path: path.to_string(),
            total_size: bytes.len() as u64,
            hash: verify::sha1_of(bytes),
            flags: *flags,
            link_target: None,
            chunks,
        });
    }

    (
        Manifest {
            depot_id,
            manifest_id,
            creation_time: 1_700_000_000,
            total_compressed: total,
            total_uncompressed: total,
            files: entries,
        },
        chunk_store,
    )
}

#[derive(Default)]
pub struct MockCdn {
    pub manifests: Mutex<HashMap<(DepotId, ManifestId), Manifest>>,
    pub chunks: Mutex<HashMap<[u8; 20], Vec<u8>>>,
    pub chunks_fetched: AtomicUsize,
    pub manifests_fetched: AtomicUsize,
}

impl MockCdn {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_manifest(&self, manifest: Manifest, chunks: HashMap<[u8; 20], Vec<u8>>) {
        self.manifests
            .lock()
            .unwrap()
            .insert((manifest.depot_id, manifest.manifest_id), manifest);
        self.chunks.lock().unwrap().extend(chunks);
    }

    pub fn fetched(&self) -> usize {
        self.chunks_fetched.load(Ordering::SeqCst)
    }
}

impl CdnClient for MockCdn {
    fn download_manifest(
        &self,
        depot_id: DepotId,
        manifest_id: ManifestId,
        _request_code: u64,
        _server: &CdnServer,
        _depot_key: &[u8; 32],
        _proxy: Option<&CdnServer>,
        _cdn_token: Option<&str>,
    ) -> Result<Manifest, DownloadError> {
        self.manifests_fetched.fetch_add(1, Ordering::SeqCst);
        self.manifests
            .lock()
            .unwrap()
            .get(&(depot_id, manifest_id))
            .cloned()
            .ok_or(DownloadError::HttpStatus(404))
    }

    fn download_chunk(
        &self,
        _depot_id: DepotId,
        chunk: &ChunkEntry,
        _server: &CdnServer,
        dst: &mut [u8],
        _depot_key: &[u8; 32],
        _proxy: Option<&CdnServer>,
        _cdn_token: Option<&str>,
    ) -> Result<usize, DownloadError> {
        self.chunks_fetched.fetch_add(1, Ordering::SeqCst);
        let chunks = self.chunks.lock().unwrap();
        let Some(plaintext) = chunks.get(&chunk.id) else {
            return Err(DownloadError::HttpStatus(404));
        };
        dst[..plaintext.len()].copy_from_slice(plaintext);
        Ok(plaintext.len())
    }
}

pub struct MockSession {
    pub apps: Mutex<HashMap<AppId, AppInfo>>,
    pub state: Mutex<SessionState>,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            apps: Mutex::new(HashMap::new()),
            state: Mutex::new(SessionState::LoggedOn),
        })
    }

    pub fn add_app(&self, info: AppInfo) {
        self.apps.lock().unwrap().insert(info.app_id, info);
    }
}

impl SessionPort for MockSession {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn is_anonymous(&self) -> bool {
        true
    }

    fn licensed_package_ids(&self) -> Vec<u32> {
        Vec::new()
    }

    fn request_app_info(&self, app_id: AppId) -> Result<AppInfo, DownloadError> {
        self.apps
            .lock()
            .unwrap()
            .get(&app_id)
            .cloned()
            .ok_or_else(|| DownloadError::NotFound(format!("app {app_id}")))
    }

    fn request_package_info(&self, package_ids: &[u32]) -> Result<Vec<PackageInfo>, DownloadError> {
        // the anonymous package grants every depot the mock knows about
        let apps = self.apps.lock().unwrap();
        let mut depot_ids: Vec<DepotId> = apps.values().flat_map(|a| a.depots.keys().copied()).collect();
        depot_ids.sort_unstable();
        Ok(package_ids
            .iter()
            .map(|id| PackageInfo {
                package_id: *id,
                app_ids: apps.keys().copied().collect(),
                depot_ids: depot_ids.clone(),
            })
            .collect())
    }

    fn request_depot_key(&self, _: DepotId, _: AppId) -> Result<DepotKey, DownloadError> {
        Ok(TEST_DEPOT_KEY)
    }

    fn get_manifest_request_code(
        &self,
        _: DepotId,
        _: AppId,
        _: ManifestId,
        _: &str,
    ) -> Result<u64, DownloadError> {
        Ok(0x1234_5678)
    }

    fn get_cdn_auth_token(
        &self,
        _: AppId,
        _: DepotId,
        _: &str,
    ) -> Result<CdnAuthToken, DownloadError> {
        Ok(CdnAuthToken {
            token: "?token=mock".to_string(),
            expires_at: None,
        })
    }

    fn get_servers(&self, _cell_id: u32) -> Result<Vec<CdnServer>, DownloadError> {
        Ok(vec![
            CdnServer {
                host: "cache1.test".to_string(),
                server_type: CdnServerType::SteamCache,
                weighted_load: 10,
                num_entries: 1,
                allowed_app_ids: Vec::new(),
                https: false,
            },
            CdnServer {
                host: "cdn1.test".to_string(),
                server_type: CdnServerType::Cdn,
                weighted_load: 50,
                num_entries: 1,
                allowed_app_ids: Vec::new(),
                https: true,
            },
        ])
    }

    fn check_beta_password(&self, _: AppId, _: &str, _: &str) -> Result<(), DownloadError> {
        Err(DownloadError::PermissionDenied("bad beta password".into()))
    }

    fn get_private_beta_depot_section(
        &self,
        _: AppId,
        _: &str,
    ) -> Result<BTreeMap<DepotId, DepotSection>, DownloadError> {
        Ok(BTreeMap::new())
    }

    fn request_free_app_license(&self, _: AppId) -> Result<bool, DownloadError> {
        Ok(false)
    }

    fn get_published_file_details(
        &self,
        _: AppId,
        _: u64,
    ) -> Result<PublishedFileDetails, DownloadError> {
        Ok(PublishedFileDetails::default())
    }

    fn get_ugc_details(&self, _: u64) -> Result<UgcDetails, DownloadError> {
        Ok(UgcDetails::default())
    }
}

/// App metadata with one plain depot section per `(depot_id, manifest_id)`.
pub fn app_with_depots(app_id: AppId, name: &str, depots: &[(DepotId, ManifestId)]) -> AppInfo {
    let mut sections = BTreeMap::new();
    for (depot_id, manifest_id) in depots {
        let mut manifests = BTreeMap::new();
        manifests.insert("public".to_string(), *manifest_id);
        sections.insert(
            *depot_id,
            DepotSection {
                name: Some(format!("depot {depot_id}")),
                manifests,
                ..Default::default()
            },
        );
    }
    let mut branches = BTreeMap::new();
    branches.insert(
        "public".to_string(),
        BranchInfo {
            build_id: 100,
            ..Default::default()
        },
    );
    AppInfo {
        app_id,
        common: AppCommon {
            name: name.to_string(),
            free_to_download: false,
            os_list: None,
        },
        depots: sections,
        branches,
    }
}
