use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use cdn::ServerPool;
use depot::{DepotDownloadAgent, InstallFilter, ManifestFetcher, Planner};
use log::{debug, warn};
use pipeline::{BufferPool, ProgressTracker, SpeedLimiter};
use session::{CdnAuthTokenCache, ManifestRequestCodeCache, SessionState};
use stores::{InstalledManifestStore, ManifestCache, ResumeStore};
use types::{
    DepotDownloadInfo, DepotFailure, DepotId, DepotOutcome, DownloadError, DownloadPlan,
    DownloadResult, Manifest,
};

use crate::context::CoreContext;

struct DepotRun {
    info: DepotDownloadInfo,
    plan_index: usize,
}

/// Per-install-directory singletons, created lazily and shared by every
/// depot targeting the same tree.
#[derive(Default)]
struct TreeStores {
    installed: HashMap<PathBuf, Arc<InstalledManifestStore>>,
    resume: HashMap<PathBuf, Arc<ResumeStore>>,
    caches: HashMap<PathBuf, Arc<ManifestCache>>,
}

impl TreeStores {
    fn installed(&mut self, dir: &PathBuf) -> Arc<InstalledManifestStore> {
        self.installed
            .entry(dir.clone())
            .or_insert_with(|| Arc::new(InstalledManifestStore::load(dir)))
            .clone()
    }

    fn resume(&mut self, dir: &PathBuf, app_id: u32, branch: &str) -> Arc<ResumeStore> {
        self.resume
            .entry(dir.clone())
            .or_insert_with(|| Arc::new(ResumeStore::load_or_create(dir, app_id, branch)))
            .clone()
    }

    fn cache(&mut self, dir: &PathBuf) -> Arc<ManifestCache> {
        self.caches
            .entry(dir.clone())
            .or_insert_with(|| Arc::new(ManifestCache::new(dir)))
            .clone()
    }

    fn flush_resume(&self) {
        for resume in self.resume.values() {
            resume.force_save();
        }
    }
}

/// Top-level orchestration of a download run: plan, resolve keys, then
/// process each depot sequentially while chunks inside a depot fetch in
/// parallel.
pub struct ContentDownloader {
    ctx: CoreContext,
}

impl ContentDownloader {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Plans without downloading anything.
    pub fn build_plan(&self) -> Result<DownloadPlan, DownloadError> {
        let ctx = &self.ctx;
        ctx.options.validate()?;
        if ctx.session.state() != SessionState::LoggedOn {
            return Err(DownloadError::NotLoggedIn);
        }
        let app_info = ctx.session.request_app_info(ctx.options.app_id)?;
        let planner = Planner::new(ctx.session.as_ref(), &ctx.options, ctx.ui.as_ref());
        planner.build_plan(&app_info).map(|(plan, _)| plan)
    }

    pub fn download_app(&self) -> Result<DownloadResult, DownloadError> {
        let ctx = &self.ctx;
        let options = &ctx.options;
        options.validate()?;
        if ctx.session.state() != SessionState::LoggedOn {
            return Err(DownloadError::NotLoggedIn);
        }
        let control = options.cancellation.clone();

        let app_info = ctx.session.request_app_info(options.app_id)?;
        let planner = Planner::new(ctx.session.as_ref(), options, ctx.ui.as_ref());
        let (mut plan, planned) = planner.build_plan(&app_info)?;
        ctx.ui.write_line(&format!(
            "Using app {} '{}' on branch '{}' ({} depot(s)).",
            plan.app_id,
            plan.app_name,
            options.branch,
            plan.depots.len()
        ));

        let servers = ctx.session.get_servers(options.cell_id)?;
        let pool = Arc::new(ServerPool::new(
            servers,
            options.app_id,
            ctx.settings.clone(),
        )?);
        let tokens = Arc::new(CdnAuthTokenCache::new());
        let request_codes = Arc::new(ManifestRequestCodeCache::new());
        let buffers = BufferPool::new();
        let limiter = options
            .effective_rate_limit()
            .map(|rate| Arc::new(SpeedLimiter::new(rate)));
        let progress = ProgressTracker::new(ctx.ui.clone());
        let filter = InstallFilter::from_options(options)?;

        let build_id = app_info
            .branch(&options.branch)
            .map(|b| b.build_id)
            .unwrap_or(0);
        let branch = options.branch.to_lowercase();

        let mut failures: Vec<DepotFailure> = Vec::new();
        let mut outcomes: Vec<DepotOutcome> = Vec::new();

        // depot keys are required before any manifest or chunk fetch
        let mut runs = Vec::new();
        for (plan_index, depot) in planned.iter().enumerate() {
            let install_dir = match &options.install_dir {
                Some(dir) => dir.clone(),
                None => PathBuf::from(stores::DEFAULT_DOWNLOAD_DIR)
                    .join(depot.depot_id.to_string())
                    .join(build_id.to_string()),
            };
            match ctx
                .session
                .request_depot_key(depot.depot_id, depot.containing_app_id)
            {
                Ok(depot_key) => runs.push(DepotRun {
                    info: DepotDownloadInfo {
                        depot_id: depot.depot_id,
                        containing_app_id: depot.containing_app_id,
                        manifest_id: depot.manifest_id,
                        branch: branch.clone(),
                        install_dir,
                        depot_key,
                    },
                    plan_index,
                }),
                Err(e) => {
                    if options.fail_fast {
                        return Err(e);
                    }
                    ctx.ui.write_error(&format!(
                        "No valid depot key for {}: {e}",
                        depot.depot_id
                    ));
                    failures.push(DepotFailure {
                        depot_id: depot.depot_id,
                        error_message: format!("no depot key: {e}"),
                    });
                }
            }
        }

        // with one shared install dir, later depots claim filenames first
        let shared_install = options.install_dir.is_some();
        let order: Vec<usize> = if shared_install {
            (0..runs.len()).rev().collect()
        } else {
            (0..runs.len()).collect()
        };

        let mut trees = TreeStores::default();
        let mut shared_claims: HashMap<String, DepotId> = HashMap::new();

        for run_index in order {
            let run = &runs[run_index];
            let depot_id = run.info.depot_id;

            if control.is_stopped() {
                trees.flush_resume();
                return Err(DownloadError::Cancelled);
            }

            let installed = trees.installed(&run.info.install_dir);
            let cache = trees.cache(&run.info.install_dir);

            if !options.manifest_only
                && !options.verify_all
                && installed.installed_manifest(depot_id) == Some(run.info.manifest_id)
            {
                ctx.ui.write_line(&format!(
                    "Already have manifest {} for depot {}.",
                    run.info.manifest_id, depot_id
                ));
                outcomes.push(DepotOutcome {
                    depot_id,
                    manifest_id: run.info.manifest_id,
                    bytes_compressed: 0,
                    bytes_uncompressed: 0,
                    files_total: 0,
                });
                continue;
            }

            let fetcher = ManifestFetcher {
                session: ctx.session.as_ref(),
                cdn: ctx.cdn.as_ref(),
                pool: pool.as_ref(),
                cache: cache.as_ref(),
                request_codes: request_codes.as_ref(),
                tokens: tokens.as_ref(),
                retry: &options.retry_policy,
                control: &control,
            };
            let manifest = match fetcher.get_manifest(&run.info) {
                Ok(manifest) => manifest,
                Err(DownloadError::Cancelled) => {
                    trees.flush_resume();
                    return Err(DownloadError::Cancelled);
                }
                Err(e) => {
                    if options.fail_fast {
                        return Err(e);
                    }
                    ctx.ui
                        .write_error(&format!("Depot {depot_id} failed: {e}"));
                    failures.push(DepotFailure {
                        depot_id,
                        error_message: e.to_string(),
                    });
                    continue;
                }
            };

            self.materialize_plan(&mut plan, run.plan_index, &manifest, &filter);

            if options.manifest_only {
                self.list_manifest(&plan, run.plan_index, &manifest);
                outcomes.push(DepotOutcome {
                    depot_id,
                    manifest_id: manifest.manifest_id,
                    bytes_compressed: 0,
                    bytes_uncompressed: 0,
                    files_total: plan.depots[run.plan_index].files.len(),
                });
                continue;
            }

            let previous = installed
                .installed_manifest(depot_id)
                .filter(|id| *id != run.info.manifest_id)
                .and_then(|id| cache.load(depot_id, id, false));
            if let Some(previous) = &previous {
                debug!(
                    "depot {depot_id}: updating from manifest {}",
                    previous.manifest_id
                );
            }

            let resume = trees.resume(&run.info.install_dir, options.app_id, &branch);
            let agent = DepotDownloadAgent {
                info: run.info.clone(),
                options: options.clone(),
                session: ctx.session.clone(),
                cdn: ctx.cdn.clone(),
                pool: pool.clone(),
                tokens: tokens.clone(),
                installed: installed.clone(),
                resume: resume.clone(),
                buffers: buffers.clone(),
                limiter: limiter.clone(),
                progress: progress.clone(),
                ui: ctx.ui.clone(),
                control: control.clone(),
            };

            // with separate install dirs, claims never cross depots
            let mut private_claims = HashMap::new();
            let claims = if shared_install {
                &mut shared_claims
            } else {
                &mut private_claims
            };

            match agent.run(&manifest, previous.as_ref(), &filter, claims) {
                Ok(outcome) => {
                    ctx.ui.write_line(&format!(
                        "Depot {depot_id} download complete ({} / {} bytes).",
                        outcome.bytes_compressed, outcome.bytes_uncompressed
                    ));
                    outcomes.push(outcome);
                }
                Err(DownloadError::Cancelled) => {
                    trees.flush_resume();
                    return Err(DownloadError::Cancelled);
                }
                // running out of disk is not a per-depot condition
                Err(e @ DownloadError::InsufficientSpace { .. }) => {
                    trees.flush_resume();
                    return Err(e);
                }
                Err(e) => {
                    if options.fail_fast {
                        trees.flush_resume();
                        return Err(e);
                    }
                    ctx.ui
                        .write_error(&format!("Depot {depot_id} failed: {e}"));
                    failures.push(DepotFailure {
                        depot_id,
                        error_message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() && !options.manifest_only {
            for resume in trees.resume.values() {
                resume.delete();
            }
        } else {
            trees.flush_resume();
        }

        if let Err(e) = ctx.settings.save() {
            warn!("failed to persist account settings: {e}");
        }

        ctx.ui.write_line(&format!(
            "Finished: {} depot(s) succeeded, {} failed.",
            outcomes.len(),
            failures.len()
        ));

        Ok(DownloadResult {
            app_id: options.app_id,
            outcomes,
            failures,
        })
    }

    fn materialize_plan(
        &self,
        plan: &mut DownloadPlan,
        index: usize,
        manifest: &Manifest,
        filter: &InstallFilter,
    ) {
        let depot_plan = &mut plan.depots[index];
        depot_plan.files = manifest
            .files
            .iter()
            .filter(|f| !f.flags.is_directory() && filter.is_included(&f.path))
            .map(|f| f.path.clone())
            .collect();
        depot_plan.total_size = manifest
            .files
            .iter()
            .filter(|f| !f.flags.is_directory() && filter.is_included(&f.path))
            .map(|f| f.total_size)
            .sum();
    }

    fn list_manifest(&self, plan: &DownloadPlan, index: usize, manifest: &Manifest) {
        let depot_plan = &plan.depots[index];
        self.ctx.ui.write_line(&format!(
            "Manifest {} for depot {}: {} file(s), {} byte(s)",
            manifest.manifest_id,
            manifest.depot_id,
            depot_plan.files.len(),
            depot_plan.total_size
        ));
        for path in &depot_plan.files {
            self.ctx.ui.write_line(&format!("  {path}"));
        }
    }
}
