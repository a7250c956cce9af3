use cdn::{CdnClient, ServerPool};
use log::{debug, info, warn};
use session::{CdnAuthTokenCache, ManifestRequestCodeCache, SessionPort};
use stores::ManifestCache;
use types::{DepotDownloadInfo, DownloadError, Manifest, RetryPolicy};
use utils::control_flag::DownloadThreadControl;

/// Fetches and caches depot manifests through the CDN pool, following the
/// same token/penalty protocol as chunk fetches.
pub struct ManifestFetcher<'a> {
    pub session: &'a dyn SessionPort,
    pub cdn: &'a dyn CdnClient,
    pub pool: &'a ServerPool,
    pub cache: &'a ManifestCache,
    pub request_codes: &'a ManifestRequestCodeCache,
    pub tokens: &'a CdnAuthTokenCache,
    pub retry: &'a RetryPolicy,
    pub control: &'a DownloadThreadControl,
}

impl ManifestFetcher<'_> {
    pub fn get_manifest(&self, info: &DepotDownloadInfo) -> Result<Manifest, DownloadError> {
        if let Some(manifest) = self.cache.load(info.depot_id, info.manifest_id, true) {
            debug!(
                "manifest {} for depot {} loaded from cache",
                info.manifest_id, info.depot_id
            );
            return Ok(manifest);
        }

        let manifest = self.fetch(info)?;
        // the cache write must land before the manifest is acted upon
        self.cache.store(&manifest)?;
        info!(
            "downloaded manifest {} for depot {}",
            info.manifest_id, info.depot_id
        );
        Ok(manifest)
    }

    fn fetch(&self, info: &DepotDownloadInfo) -> Result<Manifest, DownloadError> {
        let mut attempts = 0usize;
        let mut auth_failures = 0usize;
        let mut token_requested = false;

        loop {
            if self.control.is_stopped() {
                return Err(DownloadError::Cancelled);
            }

            let request_code = self.request_codes.get(
                self.session,
                info.depot_id,
                info.containing_app_id,
                info.manifest_id,
                &info.branch,
            )?;
            if request_code == 0 {
                return Err(DownloadError::NotFound(format!(
                    "manifest {} for depot {} is no longer available",
                    info.manifest_id, info.depot_id
                )));
            }

            let server = self.pool.get_connection();
            let token = self.tokens.cached(info.depot_id, &server.host);

            let error = match self.cdn.download_manifest(
                info.depot_id,
                info.manifest_id,
                request_code,
                &server,
                &info.depot_key,
                self.pool.proxy(),
                token.as_deref(),
            ) {
                Ok(manifest) => {
                    self.pool.return_connection(&server);
                    return Ok(manifest);
                }
                Err(DownloadError::HttpStatus(403)) if token.is_none() && !token_requested => {
                    token_requested = true;
                    match self.tokens.request(
                        self.session,
                        info.containing_app_id,
                        info.depot_id,
                        &server.host,
                    ) {
                        Ok(_) => {
                            self.pool.return_connection(&server);
                            continue;
                        }
                        Err(e) => e,
                    }
                }
                Err(e @ (DownloadError::HttpStatus(401) | DownloadError::HttpStatus(403))) => {
                    // stale request code or rejected token; refresh once
                    auth_failures += 1;
                    self.request_codes.invalidate(info.depot_id, info.manifest_id);
                    self.tokens.invalidate(info.depot_id, &server.host);
                    self.pool.return_broken_connection(&server);
                    if auth_failures >= 2 {
                        return Err(e);
                    }
                    continue;
                }
                Err(e @ DownloadError::HttpStatus(404)) => {
                    self.pool.return_broken_connection(&server);
                    return Err(e);
                }
                Err(e) if e.is_transport() => e,
                Err(e) => return Err(e),
            };

            self.pool.return_broken_connection(&server);
            attempts += 1;
            if attempts > self.retry.max_retries {
                return Err(DownloadError::RetryExhausted(format!(
                    "manifest {} for depot {}: {error}",
                    info.manifest_id, info.depot_id
                )));
            }
            warn!(
                "manifest fetch attempt {attempts} for depot {} failed: {error}",
                info.depot_id
            );
            std::thread::sleep(self.retry.get_delay(attempts - 1));
        }
    }
}
