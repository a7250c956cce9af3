use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;
use types::{AppId, DepotId, DownloadError};

use crate::port::{CdnAuthToken, SessionPort};

/// Cache of CDN auth tokens keyed by `(depot_id, host)`. Tokens are fetched
/// lazily the first time a server answers 403 and dropped when they expire
/// or when the server rejects them.
#[derive(Default)]
pub struct CdnAuthTokenCache {
    tokens: Mutex<HashMap<(DepotId, String), CdnAuthToken>>,
}

impl CdnAuthTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached, unexpired token if one exists. Does not go to the
    /// session.
    pub fn cached(&self, depot_id: DepotId, host: &str) -> Option<String> {
        let mut tokens = self.tokens.lock();
        match tokens.get(&(depot_id, host.to_string())) {
            Some(token) if !token.is_expired() => Some(token.token.clone()),
            Some(_) => {
                tokens.remove(&(depot_id, host.to_string()));
                None
            }
            None => None,
        }
    }

    /// Requests a fresh token through the session and caches it.
    pub fn request(
        &self,
        session: &dyn SessionPort,
        app_id: AppId,
        depot_id: DepotId,
        host: &str,
    ) -> Result<String, DownloadError> {
        let token = session.get_cdn_auth_token(app_id, depot_id, host)?;
        debug!("obtained cdn auth token for depot {depot_id} host {host}");
        let value = token.token.clone();
        self.tokens
            .lock()
            .insert((depot_id, host.to_string()), token);
        Ok(value)
    }

    pub fn invalidate(&self, depot_id: DepotId, host: &str) {
        self.tokens.lock().remove(&(depot_id, host.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn expired_tokens_are_evicted() {
        let cache = CdnAuthTokenCache::new();
        cache.tokens.lock().insert(
            (731, "edge.example".to_string()),
            CdnAuthToken {
                token: "stale".to_string(),
                expires_at: Some(SystemTime::now() - Duration::from_secs(1)),
            },
        );
        assert_eq!(cache.cached(731, "edge.example"), None);
        assert!(cache.tokens.lock().is_empty());
    }

    #[test]
    fn live_tokens_are_returned() {
        let cache = CdnAuthTokenCache::new();
        cache.tokens.lock().insert(
            (731, "edge.example".to_string()),
            CdnAuthToken {
                token: "live".to_string(),
                expires_at: None,
            },
        );
        assert_eq!(cache.cached(731, "edge.example"), Some("live".to_string()));
    }
}
