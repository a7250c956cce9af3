use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use stores::AccountSettingsStore;
use types::{AppId, CdnServer, CdnServerType, DownloadError};

pub const PENALTY_INCREMENT: u32 = 100;
pub const PENALTY_DECREMENT: u32 = 10;
pub const PENALTY_DECAY: u32 = 5;
pub const MAX_PENALTY: u32 = 1000;

struct Rotation {
    servers: Vec<CdnServer>,
    next: usize,
}

/// Round-robin pool over the eligible content servers. Unreliable hosts are
/// demoted through a penalty counter persisted in the account settings, so
/// ordering survives restarts.
pub struct ServerPool {
    rotation: Mutex<Rotation>,
    proxy: Option<CdnServer>,
    settings: Arc<AccountSettingsStore>,
}

impl ServerPool {
    /// Builds the rotation from a fresh server list. Every known penalty
    /// decays by [`PENALTY_DECAY`] on refresh.
    pub fn new(
        servers: Vec<CdnServer>,
        app_id: AppId,
        settings: Arc<AccountSettingsStore>,
    ) -> Result<Self, DownloadError> {
        settings.decay_penalties(PENALTY_DECAY);
        if let Err(e) = settings.save() {
            warn!("failed to persist penalty decay: {e}");
        }

        let proxy = servers
            .iter()
            .find(|s| s.server_type == CdnServerType::Proxy)
            .cloned();

        let mut eligible: Vec<CdnServer> = servers
            .into_iter()
            .filter(|s| s.server_type != CdnServerType::Proxy && s.serves_app(app_id))
            .collect();

        eligible.sort_by_key(|s| (settings.penalty(&s.host), s.weighted_load));

        let mut rotation = Vec::new();
        for server in eligible {
            for _ in 0..server.num_entries.max(1) {
                rotation.push(server.clone());
            }
        }

        if rotation.is_empty() {
            return Err(DownloadError::NoServers);
        }

        debug!(
            "cdn pool ready with {} rotation entries{}",
            rotation.len(),
            if proxy.is_some() { " and a proxy" } else { "" }
        );

        Ok(Self {
            rotation: Mutex::new(Rotation {
                servers: rotation,
                next: 0,
            }),
            proxy,
            settings,
        })
    }

    pub fn proxy(&self) -> Option<&CdnServer> {
        self.proxy.as_ref()
    }

    pub fn get_connection(&self) -> CdnServer {
        let mut rotation = self.rotation.lock();
        let index = rotation.next % rotation.servers.len();
        rotation.next += 1;
        rotation.servers[index].clone()
    }

    /// The request succeeded; reward the host a little.
    pub fn return_connection(&self, server: &CdnServer) {
        let penalty = self.settings.penalty(&server.host);
        self.settings
            .set_penalty(&server.host, penalty.saturating_sub(PENALTY_DECREMENT));
    }

    /// The request failed in a way that implicates the host: penalize it,
    /// move the cursor past it, and persist so the demotion outlives us.
    pub fn return_broken_connection(&self, server: &CdnServer) {
        {
            let mut rotation = self.rotation.lock();
            let len = rotation.servers.len();
            for _ in 0..len {
                if rotation.servers[rotation.next % len].host != server.host {
                    break;
                }
                rotation.next += 1;
            }
        }

        let penalty = self.settings.penalty(&server.host);
        self.settings
            .set_penalty(&server.host, (penalty + PENALTY_INCREMENT).min(MAX_PENALTY));
        if let Err(e) = self.settings.save() {
            warn!("failed to persist penalty for {}: {e}", server.host);
        }
    }
}
