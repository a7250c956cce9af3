mod blob;
pub mod disk;
pub mod installed;
pub mod manifest_cache;
pub mod resume;
pub mod settings;

use std::path::{Path, PathBuf};

/// Per-tree configuration directory under the install root.
pub const CONFIG_DIR: &str = ".DepotDownloader";
/// Intermediate rewrites during delta updates live here.
pub const STAGING_DIR: &str = "staging";
/// Installed-manifest map file inside [`CONFIG_DIR`].
pub const DEPOT_CONFIG_FILE: &str = "depot.config";
/// Resume checkpoint file inside [`CONFIG_DIR`].
pub const RESUME_FILE: &str = "download_state.json";
/// Default install root used when no install dir is configured.
pub const DEFAULT_DOWNLOAD_DIR: &str = "depots";

pub fn config_dir(install_dir: &Path) -> PathBuf {
    install_dir.join(CONFIG_DIR)
}

pub fn staging_dir(install_dir: &Path) -> PathBuf {
    config_dir(install_dir).join(STAGING_DIR)
}

pub use installed::InstalledManifestStore;
pub use manifest_cache::ManifestCache;
pub use resume::{DepotResume, ResumeState, ResumeStore};
pub use settings::AccountSettingsStore;
