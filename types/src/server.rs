use serde::{Deserialize, Serialize};

use crate::AppId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CdnServerType {
    SteamCache,
    Cdn,
    Proxy,
}

/// A content server advertised by the session's server-list RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnServer {
    pub host: String,
    pub server_type: CdnServerType,
    pub weighted_load: u32,
    /// How many slots this server occupies in the round-robin rotation.
    pub num_entries: u32,
    /// Empty means "serves any app".
    pub allowed_app_ids: Vec<AppId>,
    pub https: bool,
}

impl CdnServer {
    pub fn serves_app(&self, app_id: AppId) -> bool {
        self.allowed_app_ids.is_empty() || self.allowed_app_ids.contains(&app_id)
    }

    pub fn base_url(&self) -> String {
        if self.https {
            format!("https://{}", self.host)
        } else {
            format!("http://{}", self.host)
        }
    }
}
