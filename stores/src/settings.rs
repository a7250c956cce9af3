use std::{collections::HashMap, path::PathBuf, sync::Mutex};

use bitcode::{Decode, Encode};
use log::warn;
use types::DownloadError;
use utils::lock;

use crate::blob;

/// Serialized account-level settings. The engine only touches the content
/// server penalty map; the authentication collaborator owns the rest of the
/// file and shares this store with us.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct AccountSettings {
    pub content_server_penalty: HashMap<String, u32>,
}

/// Singleton store guarded by a process-wide mutex. Loads are best-effort:
/// a corrupt file logs a warning and starts empty.
pub struct AccountSettingsStore {
    path: PathBuf,
    inner: Mutex<AccountSettings>,
}

impl AccountSettingsStore {
    pub fn load(path: PathBuf) -> Self {
        let settings = match blob::read_blob(&path) {
            Ok(payload) => match bitcode::decode(&payload) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("account settings were unreadable, starting fresh: {e}");
                    AccountSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AccountSettings::default(),
            Err(e) => {
                warn!("account settings were unreadable, starting fresh: {e}");
                AccountSettings::default()
            }
        };
        Self {
            path,
            inner: Mutex::new(settings),
        }
    }

    pub fn save(&self) -> Result<(), DownloadError> {
        let payload = {
            let settings = lock!(self.inner);
            bitcode::encode(&*settings)
        };
        blob::write_blob(&self.path, &payload)?;
        Ok(())
    }

    pub fn penalty(&self, host: &str) -> u32 {
        lock!(self.inner)
            .content_server_penalty
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_penalty(&self, host: &str, penalty: u32) {
        let mut settings = lock!(self.inner);
        if penalty == 0 {
            settings.content_server_penalty.remove(host);
        } else {
            settings
                .content_server_penalty
                .insert(host.to_string(), penalty);
        }
    }

    /// Applied on every server-list refresh so penalties fade across runs.
    pub fn decay_penalties(&self, amount: u32) {
        let mut settings = lock!(self.inner);
        settings
            .content_server_penalty
            .retain(|_, penalty| match penalty.checked_sub(amount) {
                Some(remaining) if remaining > 0 => {
                    *penalty = remaining;
                    true
                }
                _ => false,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalties_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("account.settings");

        let store = AccountSettingsStore::load(path.clone());
        store.set_penalty("cache1.example", 300);
        store.save().unwrap();

        let reloaded = AccountSettingsStore::load(path);
        assert_eq!(reloaded.penalty("cache1.example"), 300);
        assert_eq!(reloaded.penalty("unknown.example"), 0);
    }

    #[test]
    fn decay_floors_at_zero_and_drops_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountSettingsStore::load(dir.path().join("account.settings"));
        store.set_penalty("a", 7);
        store.set_penalty("b", 3);
        store.decay_penalties(5);
        assert_eq!(store.penalty("a"), 2);
        assert_eq!(store.penalty("b"), 0);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("account.settings");
        std::fs::write(&path, b"garbage").unwrap();
        let store = AccountSettingsStore::load(path);
        assert_eq!(store.penalty("cache1.example"), 0);
    }
}
