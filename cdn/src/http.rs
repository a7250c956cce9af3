use std::{io::Read, time::Duration};

use flate2::read::ZlibDecoder;
use log::{debug, warn};
use types::{CdnServer, ChunkEntry, DepotId, DownloadError, Manifest, ManifestId, codec};

use crate::{client::CdnClient, crypto};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MANIFEST_VERSION: u32 = 5;

/// Default transport over the Steam content HTTP endpoints. Payloads are
/// decrypted with the depot key (ECB-wrapped IV + CBC body) and inflated
/// when the plaintext carries a zlib header.
pub struct HttpCdnClient {
    client: reqwest::blocking::Client,
}

impl HttpCdnClient {
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::blocking::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .use_rustls_tls()
            .build()
            .map_err(|e| DownloadError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Requests go straight to the content server, or through the cache
    /// proxy with the origin host as the leading path segment.
    fn build_url(server: &CdnServer, proxy: Option<&CdnServer>, path: &str, token: Option<&str>) -> String {
        let mut url = match proxy {
            Some(proxy) => format!("{}/{}/{path}", proxy.base_url(), server.host),
            None => format!("{}/{path}", server.base_url()),
        };
        if let Some(token) = token {
            if !token.starts_with('?') {
                url.push('?');
            }
            url.push_str(token);
        }
        url
    }

    fn get(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| DownloadError::Network(e.to_string()))
    }
}

impl CdnClient for HttpCdnClient {
    fn download_manifest(
        &self,
        depot_id: DepotId,
        manifest_id: ManifestId,
        request_code: u64,
        server: &CdnServer,
        depot_key: &[u8; 32],
        proxy: Option<&CdnServer>,
        cdn_token: Option<&str>,
    ) -> Result<Manifest, DownloadError> {
        let path = format!("depot/{depot_id}/manifest/{manifest_id}/{MANIFEST_VERSION}/{request_code}");
        let url = Self::build_url(server, proxy, &path, cdn_token);
        debug!("fetching manifest {manifest_id} for depot {depot_id} from {}", server.host);

        let payload = self.get(&url)?;
        let plaintext = crypto::decrypt_payload(depot_key, &payload)
            .map_err(|_| DownloadError::InvalidManifest("manifest payload failed to decrypt".to_string()))?;

        let manifest = codec::decode_manifest(&plaintext)?;
        if manifest.depot_id != depot_id || manifest.manifest_id != manifest_id {
            return Err(DownloadError::InvalidManifest(format!(
                "server returned manifest {}/{} instead of {depot_id}/{manifest_id}",
                manifest.depot_id, manifest.manifest_id
            )));
        }
        Ok(manifest)
    }

    fn download_chunk(
        &self,
        depot_id: DepotId,
        chunk: &ChunkEntry,
        server: &CdnServer,
        dst: &mut [u8],
        depot_key: &[u8; 32],
        proxy: Option<&CdnServer>,
        cdn_token: Option<&str>,
    ) -> Result<usize, DownloadError> {
        let path = format!("depot/{depot_id}/chunk/{}", chunk.id_hex());
        let url = Self::build_url(server, proxy, &path, cdn_token);

        let payload = self.get(&url)?;
        if payload.is_empty() {
            return Ok(0);
        }

        let plaintext = crypto::decrypt_payload(depot_key, &payload)?;

        // chunk bodies are deflated unless compression gained nothing
        let written = if plaintext.first() == Some(&0x78) {
            let mut decoder = ZlibDecoder::new(plaintext.as_slice());
            let mut written = 0usize;
            loop {
                if written == dst.len() {
                    // overly long stream; poke for one more byte
                    let mut probe = [0u8; 1];
                    if decoder.read(&mut probe).map_err(|e| {
                        DownloadError::ChecksumMismatch(format!("chunk failed to inflate: {e}"))
                    })? > 0
                    {
                        warn!("chunk {} inflated past its declared length", chunk.id_hex());
                        return Err(DownloadError::ChecksumMismatch(
                            "chunk inflated past its declared length".to_string(),
                        ));
                    }
                    break;
                }
                let n = decoder.read(&mut dst[written..]).map_err(|e| {
                    DownloadError::ChecksumMismatch(format!("chunk failed to inflate: {e}"))
                })?;
                if n == 0 {
                    break;
                }
                written += n;
            }
            written
        } else {
            if plaintext.len() > dst.len() {
                return Err(DownloadError::ChecksumMismatch(
                    "chunk plaintext exceeds its declared length".to_string(),
                ));
            }
            dst[..plaintext.len()].copy_from_slice(&plaintext);
            plaintext.len()
        };

        Ok(written)
    }
}
