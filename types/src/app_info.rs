use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AppId, DepotId, ManifestId};

/// Typed view of an app's product-info sections, as supplied by the session
/// port. Branch names are stored lowercased; lookups go through
/// [`AppInfo::branch`] and [`DepotSection::manifest_for_branch`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: AppId,
    pub common: AppCommon,
    pub depots: BTreeMap<DepotId, DepotSection>,
    pub branches: BTreeMap<String, BranchInfo>,
}

impl AppInfo {
    pub fn branch(&self, name: &str) -> Option<&BranchInfo> {
        self.branches.get(&name.to_lowercase())
    }

    pub fn name(&self) -> &str {
        if self.common.name.is_empty() {
            "unknown"
        } else {
            &self.common.name
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppCommon {
    pub name: String,
    pub free_to_download: bool,
    pub os_list: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepotSection {
    pub name: Option<String>,
    /// Comma-separated OS labels this depot applies to.
    pub os_list: Option<String>,
    pub os_arch: Option<String>,
    pub language: Option<String>,
    pub low_violence: bool,
    pub shared_install: bool,
    /// Shared depots resolve their manifests against this owning app.
    pub depot_from_app: Option<AppId>,
    /// Branch name (lowercased) -> manifest gid.
    pub manifests: BTreeMap<String, ManifestId>,
    /// Branches whose gids require a branch-password unlock.
    pub encrypted_manifests: BTreeMap<String, EncryptedManifest>,
}

impl DepotSection {
    pub fn manifest_for_branch(&self, branch: &str) -> Option<ManifestId> {
        self.manifests.get(&branch.to_lowercase()).copied()
    }

    pub fn has_encrypted_manifest(&self, branch: &str) -> bool {
        self.encrypted_manifests.contains_key(&branch.to_lowercase())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptedManifest {
    pub encrypted_gid: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchInfo {
    pub build_id: u32,
    pub pwd_required: bool,
    pub time_updated: Option<u64>,
    pub description: Option<String>,
}

/// Licensed package key-values, as far as the access check needs them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageInfo {
    pub package_id: u32,
    pub app_ids: Vec<AppId>,
    pub depot_ids: Vec<DepotId>,
}

/// Workshop item details, surfaced by the session port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishedFileDetails {
    pub published_file_id: u64,
    pub consumer_app_id: AppId,
    pub hcontent_file: Option<ManifestId>,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UgcDetails {
    pub ugc_id: u64,
    pub app_id: AppId,
    pub url: String,
    pub filename: String,
}
