use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use log::debug;
use parking_lot::Mutex;
use types::{AppId, DepotId, DownloadError, ManifestId};

use crate::port::SessionPort;

/// Manifest request codes are short-lived; the CDN rejects stale ones.
const REQUEST_CODE_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache of manifest request codes keyed by `(depot_id, manifest_id)`.
/// Codes refresh on TTL expiry and are invalidated eagerly when the CDN
/// answers with an authorization error.
#[derive(Default)]
pub struct ManifestRequestCodeCache {
    codes: Mutex<HashMap<(DepotId, ManifestId), (u64, Instant)>>,
}

impl ManifestRequestCodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a usable request code, going to the session when the cached
    /// one is missing or older than the TTL. A code of zero means the
    /// manifest is no longer available; callers treat it as fatal for the
    /// depot, so it is never cached.
    pub fn get(
        &self,
        session: &dyn SessionPort,
        depot_id: DepotId,
        app_id: AppId,
        manifest_id: ManifestId,
        branch: &str,
    ) -> Result<u64, DownloadError> {
        if let Some((code, fetched_at)) = self.codes.lock().get(&(depot_id, manifest_id))
            && fetched_at.elapsed() < REQUEST_CODE_TTL
        {
            return Ok(*code);
        }

        let code = session.get_manifest_request_code(depot_id, app_id, manifest_id, branch)?;
        debug!("refreshed manifest request code for depot {depot_id} manifest {manifest_id}");
        if code != 0 {
            self.codes
                .lock()
                .insert((depot_id, manifest_id), (code, Instant::now()));
        }
        Ok(code)
    }

    pub fn invalidate(&self, depot_id: DepotId, manifest_id: ManifestId) {
        self.codes.lock().remove(&(depot_id, manifest_id));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::port::{CdnAuthToken, DepotKey, SessionState};
    use types::app_info::{AppInfo, DepotSection, PackageInfo, PublishedFileDetails, UgcDetails};
    use types::{CdnServer, ManifestId};

    struct CountingSession {
        calls: AtomicUsize,
    }

    impl SessionPort for CountingSession {
        fn state(&self) -> SessionState {
            SessionState::LoggedOn
        }
        fn is_anonymous(&self) -> bool {
            true
        }
        fn licensed_package_ids(&self) -> Vec<u32> {
            Vec::new()
        }
        fn request_app_info(&self, _: u32) -> Result<AppInfo, DownloadError> {
            unimplemented!()
        }
        fn request_package_info(&self, _: &[u32]) -> Result<Vec<PackageInfo>, DownloadError> {
            unimplemented!()
        }
        fn request_depot_key(&self, _: u32, _: u32) -> Result<DepotKey, DownloadError> {
            unimplemented!()
        }
        fn get_manifest_request_code(
            &self,
            _: u32,
            _: u32,
            _: ManifestId,
            _: &str,
        ) -> Result<u64, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(0xfeed)
        }
        fn get_cdn_auth_token(&self, _: u32, _: u32, _: &str) -> Result<CdnAuthToken, DownloadError> {
            unimplemented!()
        }
        fn get_servers(&self, _: u32) -> Result<Vec<CdnServer>, DownloadError> {
            unimplemented!()
        }
        fn check_beta_password(&self, _: u32, _: &str, _: &str) -> Result<(), DownloadError> {
            unimplemented!()
        }
        fn get_private_beta_depot_section(
            &self,
            _: u32,
            _: &str,
        ) -> Result<std::collections::BTreeMap<u32, DepotSection>, DownloadError> {
            unimplemented!()
        }
        fn request_free_app_license(&self, _: u32) -> Result<bool, DownloadError> {
            unimplemented!()
        }
        fn get_published_file_details(
            &self,
            _: u32,
            _: u64,
        ) -> Result<PublishedFileDetails, DownloadError> {
            unimplemented!()
        }
        fn get_ugc_details(&self, _: u64) -> Result<UgcDetails, DownloadError> {
            unimplemented!()
        }
    }

    #[test]
    fn codes_are_cached_until_invalidated() {
        let session = CountingSession {
            calls: AtomicUsize::new(0),
        };
        let cache = ManifestRequestCodeCache::new();
        assert_eq!(cache.get(&session, 731, 730, 5, "public").unwrap(), 0xfeed);
        assert_eq!(cache.get(&session, 731, 730, 5, "public").unwrap(), 0xfeed);
        assert_eq!(session.calls.load(Ordering::SeqCst), 1);

        cache.invalidate(731, 5);
        assert_eq!(cache.get(&session, 731, 730, 5, "public").unwrap(), 0xfeed);
        assert_eq!(session.calls.load(Ordering::SeqCst), 2);
    }
}
