use std::path::PathBuf;

use serde::Serialize;

use crate::{AppId, DepotId, ManifestId};

/// Per-depot slice of a download plan. `files` and `total_size` are filled in
/// once the target manifest has been fetched.
#[derive(Debug, Clone, Serialize)]
pub struct DepotPlan {
    pub depot_id: DepotId,
    pub manifest_id: ManifestId,
    pub files: Vec<String>,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadPlan {
    pub app_id: AppId,
    pub app_name: String,
    pub depots: Vec<DepotPlan>,
}

/// Resolved tuple for executing one depot. Created by the planner, consumed
/// by the reconciler and the chunk pipeline, discarded after commit.
#[derive(Clone)]
pub struct DepotDownloadInfo {
    pub depot_id: DepotId,
    /// The app whose section the manifest was resolved from (differs from the
    /// target app for shared depots).
    pub containing_app_id: AppId,
    pub manifest_id: ManifestId,
    pub branch: String,
    pub install_dir: PathBuf,
    pub depot_key: [u8; 32],
}

#[derive(Debug, Clone, Serialize)]
pub struct DepotOutcome {
    pub depot_id: DepotId,
    pub manifest_id: ManifestId,
    pub bytes_compressed: u64,
    pub bytes_uncompressed: u64,
    pub files_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepotFailure {
    pub depot_id: DepotId,
    pub error_message: String,
}

/// Per-depot outcomes of a whole run. The installed-manifest map reflects
/// only the depots listed in `outcomes`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadResult {
    pub app_id: AppId,
    pub outcomes: Vec<DepotOutcome>,
    pub failures: Vec<DepotFailure>,
}

impl DownloadResult {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}
