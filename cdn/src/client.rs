use types::{CdnServer, ChunkEntry, DepotId, DownloadError, Manifest, ManifestId};

/// Transport for manifests and chunks. Implementations decode payloads into
/// plaintext; the engine still verifies lengths and checksums independently.
pub trait CdnClient: Send + Sync {
    fn download_manifest(
        &self,
        depot_id: DepotId,
        manifest_id: ManifestId,
        request_code: u64,
        server: &CdnServer,
        depot_key: &[u8; 32],
        proxy: Option<&CdnServer>,
        cdn_token: Option<&str>,
    ) -> Result<Manifest, DownloadError>;

    /// Downloads and decodes one chunk into `dst`, returning the plaintext
    /// length written. `dst` is at least `chunk.uncompressed_length` bytes.
    fn download_chunk(
        &self,
        depot_id: DepotId,
        chunk: &ChunkEntry,
        server: &CdnServer,
        dst: &mut [u8],
        depot_key: &[u8; 32],
        proxy: Option<&CdnServer>,
        cdn_token: Option<&str>,
    ) -> Result<usize, DownloadError>;
}
