use std::time::SystemTime;

use types::{
    AppId, CdnServer, DepotId, DownloadError, ManifestId,
    app_info::{AppInfo, PackageInfo, PublishedFileDetails, UgcDetails},
};

pub type DepotKey = [u8; 32];

/// Per-host bearer token some content servers require for chunk fetches.
#[derive(Debug, Clone)]
pub struct CdnAuthToken {
    pub token: String,
    pub expires_at: Option<SystemTime>,
}

impl CdnAuthToken {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => SystemTime::now() >= at,
            None => false,
        }
    }
}

/// Observed lifecycle of the Steam connection behind the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticated,
    LoggedOn,
    LoggedOff,
}

/// Capability the surrounding application supplies for everything that goes
/// over the Steam wire protocol. Calls may block; they are driven from
/// worker threads and must be safe to issue concurrently.
pub trait SessionPort: Send + Sync {
    fn state(&self) -> SessionState;

    /// The account holds no licenses of its own; access checks fall back to
    /// the anonymous dedicated-server package.
    fn is_anonymous(&self) -> bool;

    /// Package ids currently licensed to the account.
    fn licensed_package_ids(&self) -> Vec<u32>;

    fn request_app_info(&self, app_id: AppId) -> Result<AppInfo, DownloadError>;

    fn request_package_info(&self, package_ids: &[u32]) -> Result<Vec<PackageInfo>, DownloadError>;

    fn request_depot_key(&self, depot_id: DepotId, app_id: AppId)
    -> Result<DepotKey, DownloadError>;

    fn get_manifest_request_code(
        &self,
        depot_id: DepotId,
        app_id: AppId,
        manifest_id: ManifestId,
        branch: &str,
    ) -> Result<u64, DownloadError>;

    fn get_cdn_auth_token(
        &self,
        app_id: AppId,
        depot_id: DepotId,
        host: &str,
    ) -> Result<CdnAuthToken, DownloadError>;

    fn get_servers(&self, cell_id: u32) -> Result<Vec<CdnServer>, DownloadError>;

    fn check_beta_password(
        &self,
        app_id: AppId,
        branch: &str,
        password: &str,
    ) -> Result<(), DownloadError>;

    /// Depot sections of a password-protected branch, readable only after a
    /// successful `check_beta_password`.
    fn get_private_beta_depot_section(
        &self,
        app_id: AppId,
        branch: &str,
    ) -> Result<std::collections::BTreeMap<DepotId, types::app_info::DepotSection>, DownloadError>;

    fn request_free_app_license(&self, app_id: AppId) -> Result<bool, DownloadError>;

    fn get_published_file_details(
        &self,
        app_id: AppId,
        published_file_id: u64,
    ) -> Result<PublishedFileDetails, DownloadError>;

    fn get_ugc_details(&self, ugc_id: u64) -> Result<UgcDetails, DownloadError>;
}
