use std::collections::HashSet;

use log::{debug, info, warn};
use session::SessionPort;
use types::{
    AppId, DEFAULT_BRANCH, DepotId, DepotPlan, DownloadError, DownloadOptions, DownloadPlan,
    INVALID_MANIFEST_ID, ManifestId, UiSink,
    app_info::{AppInfo, DepotSection},
};

/// Package every anonymous account implicitly holds, granting dedicated
/// server content.
const ANONYMOUS_DEDICATED_SERVER_PACKAGE: u32 = 17906;

/// A depot the planner selected, with its manifest resolved. The containing
/// app differs from the target app for shared depots.
#[derive(Debug, Clone)]
pub struct PlannedDepot {
    pub depot_id: DepotId,
    pub containing_app_id: AppId,
    pub manifest_id: ManifestId,
}

pub struct Planner<'a> {
    session: &'a dyn SessionPort,
    options: &'a DownloadOptions,
    ui: &'a dyn UiSink,
}

impl<'a> Planner<'a> {
    pub fn new(session: &'a dyn SessionPort, options: &'a DownloadOptions, ui: &'a dyn UiSink) -> Self {
        Self {
            session,
            options,
            ui,
        }
    }

    /// Filters the app's depots, checks access and resolves a manifest id
    /// per depot. Planning failures are never retried.
    pub fn build_plan(&self, app_info: &AppInfo) -> Result<(DownloadPlan, Vec<PlannedDepot>), DownloadError> {
        let branch = self.options.branch.to_lowercase();

        let candidates: Vec<(DepotId, Option<ManifestId>)> =
            if self.options.depot_manifest_pairs.is_empty() {
                app_info
                    .depots
                    .iter()
                    .filter(|(_, section)| self.depot_matches_filters(section))
                    .map(|(depot_id, _)| (*depot_id, None))
                    .collect()
            } else {
                self.options
                    .depot_manifest_pairs
                    .iter()
                    .map(|(depot_id, manifest_id)| {
                        (
                            *depot_id,
                            Some(*manifest_id).filter(|id| *id != INVALID_MANIFEST_ID),
                        )
                    })
                    .collect()
            };

        if candidates.is_empty() {
            return Err(DownloadError::NotFound(format!(
                "no depots of app {} match the requested filters",
                app_info.app_id
            )));
        }

        let mut planned = Vec::new();
        let mut denied = 0usize;
        for (depot_id, explicit_manifest) in candidates {
            let Some(section) = app_info.depots.get(&depot_id) else {
                return Err(DownloadError::NotFound(format!(
                    "depot {depot_id} is not listed for app {}",
                    app_info.app_id
                )));
            };

            if !self.account_has_access(app_info, depot_id)? {
                self.ui.write_error(&format!(
                    "Depot {depot_id} is not available from this account."
                ));
                denied += 1;
                continue;
            }

            let containing_app_id = section
                .depot_from_app
                .filter(|other| *other != app_info.app_id)
                .unwrap_or(app_info.app_id);

            let manifest_id = match explicit_manifest {
                Some(id) => id,
                None => {
                    let mut visited = HashSet::new();
                    match self.resolve_manifest(app_info, depot_id, section, &branch, &mut visited)? {
                        Some(id) => id,
                        None => {
                            warn!(
                                "depot {depot_id} has no manifest for branch {branch}, skipping"
                            );
                            continue;
                        }
                    }
                }
            };

            debug!("planned depot {depot_id} manifest {manifest_id} (app {containing_app_id})");
            planned.push(PlannedDepot {
                depot_id,
                containing_app_id,
                manifest_id,
            });
        }

        if planned.is_empty() {
            return Err(if denied > 0 {
                DownloadError::PermissionDenied(format!(
                    "no accessible depots for app {}",
                    app_info.app_id
                ))
            } else {
                DownloadError::NotFound(format!(
                    "no downloadable depots for app {} on branch {branch}",
                    app_info.app_id
                ))
            });
        }

        info!(
            "planned {} depot(s) for {} ({})",
            planned.len(),
            app_info.name(),
            app_info.app_id
        );

        let plan = DownloadPlan {
            app_id: app_info.app_id,
            app_name: app_info.name().to_string(),
            depots: planned
                .iter()
                .map(|p| DepotPlan {
                    depot_id: p.depot_id,
                    manifest_id: p.manifest_id,
                    files: Vec::new(),
                    total_size: 0,
                })
                .collect(),
        };
        Ok((plan, planned))
    }

    fn depot_matches_filters(&self, section: &DepotSection) -> bool {
        let options = self.options;

        if let Some(os_list) = &section.os_list
            && !options.download_all_platforms
        {
            let target = options.target_os();
            if !os_list
                .to_lowercase()
                .split(',')
                .any(|os| os.trim() == target)
            {
                return false;
            }
        }

        if let Some(os_arch) = &section.os_arch
            && !options.download_all_archs
            && os_arch.trim() != options.target_arch()
        {
            return false;
        }

        if let Some(language) = &section.language
            && !options.download_all_languages
            && !language.trim().eq_ignore_ascii_case(&options.target_language())
        {
            return false;
        }

        if section.low_violence && !options.low_violence {
            return false;
        }

        true
    }

    /// A depot is reachable when some licensed package grants it (anonymous
    /// accounts hold the dedicated-server package), or the app is free.
    fn account_has_access(&self, app_info: &AppInfo, depot_id: DepotId) -> Result<bool, DownloadError> {
        let package_ids = if self.session.is_anonymous() {
            vec![ANONYMOUS_DEDICATED_SERVER_PACKAGE]
        } else {
            self.session.licensed_package_ids()
        };

        if !package_ids.is_empty() {
            let packages = self.session.request_package_info(&package_ids)?;
            for package in packages {
                if package.app_ids.contains(&depot_id) || package.depot_ids.contains(&depot_id) {
                    return Ok(true);
                }
            }
        }

        if app_info.common.free_to_download {
            return Ok(true);
        }

        Ok(self.session.request_free_app_license(app_info.app_id)?)
    }

    /// Branch gid, falling back through the password unlock and finally the
    /// default branch. Shared depots recurse into their owning app.
    fn resolve_manifest(
        &self,
        app_info: &AppInfo,
        depot_id: DepotId,
        section: &DepotSection,
        branch: &str,
        visited: &mut HashSet<AppId>,
    ) -> Result<Option<ManifestId>, DownloadError> {
        visited.insert(app_info.app_id);

        if let Some(other_app) = section.depot_from_app
            && !visited.contains(&other_app)
        {
            let other_info = self.session.request_app_info(other_app)?;
            if let Some(other_section) = other_info.depots.get(&depot_id) {
                return self.resolve_manifest(&other_info, depot_id, other_section, branch, visited);
            }
            return Err(DownloadError::NotFound(format!(
                "depot {depot_id} is not listed for its owning app {other_app}"
            )));
        }

        if let Some(gid) = section.manifest_for_branch(branch) {
            return Ok(Some(gid));
        }

        if !branch.eq_ignore_ascii_case(DEFAULT_BRANCH) {
            if section.has_encrypted_manifest(branch) {
                let Some(password) = &self.options.branch_password else {
                    return Err(DownloadError::AuthRequired);
                };
                self.session
                    .check_beta_password(app_info.app_id, branch, password)?;
                let private = self
                    .session
                    .get_private_beta_depot_section(app_info.app_id, branch)?;
                if let Some(private_section) = private.get(&depot_id)
                    && let Some(gid) = private_section.manifest_for_branch(branch)
                {
                    return Ok(Some(gid));
                }
            }

            if let Some(gid) = section.manifest_for_branch(DEFAULT_BRANCH) {
                warn!(
                    "depot {depot_id} has no manifest for branch {branch}, using {DEFAULT_BRANCH}"
                );
                return Ok(Some(gid));
            }
        }

        Ok(None)
    }
}
