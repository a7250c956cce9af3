use std::{
    collections::HashMap,
    fs,
    sync::{Arc, Mutex},
};

use cdn::{CdnClient, ServerPool};
use log::{debug, error, info};
use pipeline::{BufferPool, ChunkPipeline, ProgressTracker, SpeedLimiter};
use rayon::ThreadPoolBuilder;
use session::{CdnAuthTokenCache, SessionPort};
use stores::{InstalledManifestStore, ResumeStore, disk};
use types::{
    DepotDownloadInfo, DepotId, DepotOutcome, DownloadError, DownloadOptions, Manifest, UiSink,
};
use utils::{
    control_flag::{DownloadThreadControl, DownloadThreadControlFlag},
    lock,
};

use crate::{filter::InstallFilter, reconcile::reconcile_depot};

/// Executes one depot end to end: invalidate, reconcile, drain the chunk
/// queue on a bounded worker pool, delete stale files, commit.
pub struct DepotDownloadAgent {
    pub info: DepotDownloadInfo,
    pub options: DownloadOptions,
    pub session: Arc<dyn SessionPort>,
    pub cdn: Arc<dyn CdnClient>,
    pub pool: Arc<ServerPool>,
    pub tokens: Arc<CdnAuthTokenCache>,
    pub installed: Arc<InstalledManifestStore>,
    pub resume: Arc<ResumeStore>,
    pub buffers: Arc<BufferPool>,
    pub limiter: Option<Arc<SpeedLimiter>>,
    pub progress: Arc<ProgressTracker>,
    pub ui: Arc<dyn UiSink>,
    pub control: DownloadThreadControl,
}

impl DepotDownloadAgent {
    pub fn run(
        &self,
        manifest: &Manifest,
        previous: Option<&Manifest>,
        filter: &InstallFilter,
        claims: &mut HashMap<String, DepotId>,
    ) -> Result<DepotOutcome, DownloadError> {
        let depot_id = self.info.depot_id;
        info!(
            "processing depot {depot_id} (manifest {})",
            manifest.manifest_id
        );

        // from here until commit, the previous install is not trusted
        self.installed.mark_in_progress(depot_id)?;
        self.resume.ensure_depot(depot_id, manifest.manifest_id, 0);

        let compressed_before = self.progress.bytes_compressed();
        let work = reconcile_depot(
            &self.info,
            manifest,
            previous,
            self.options.verify_all,
            filter,
            claims,
            &self.resume,
        )?;

        let depot_total = work.bytes_to_fetch + work.bytes_reused;
        self.resume
            .ensure_depot(depot_id, manifest.manifest_id, depot_total);
        self.progress
            .begin_depot(depot_id, depot_total, work.files_total);
        self.progress.skip_bytes(work.bytes_reused);
        for _ in 0..work.files_already_complete {
            self.progress.file_completed();
        }

        if self.options.verify_disk_space && work.bytes_to_fetch > 0 {
            let (drive, available) = disk::available_bytes(&self.info.install_dir)?;
            if work.bytes_to_fetch > available {
                return Err(DownloadError::InsufficientSpace {
                    required: work.bytes_to_fetch,
                    available,
                    drive,
                });
            }
        }

        if !work.jobs.is_empty() {
            self.drain(&work.jobs)?;
        }

        for stale in &work.stale_files {
            match fs::remove_file(stale) {
                Ok(()) => debug!("deleted stale file {}", stale.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.ui
                        .write_error(&format!("could not delete {}: {e}", stale.display()));
                }
            }
        }

        self.installed.commit(depot_id, manifest.manifest_id)?;
        self.resume.depot_complete(depot_id);
        info!("depot {depot_id} committed at manifest {}", manifest.manifest_id);

        Ok(DepotOutcome {
            depot_id,
            manifest_id: manifest.manifest_id,
            bytes_compressed: self.progress.bytes_compressed() - compressed_before,
            bytes_uncompressed: depot_total,
            files_total: work.files_total,
        })
    }

    /// Drains the chunk queue on a worker pool of `max_concurrency` threads.
    /// The first terminal chunk error aborts the depot's remaining work.
    fn drain(&self, jobs: &[pipeline::ChunkJob]) -> Result<(), DownloadError> {
        let abort = DownloadThreadControl::new(DownloadThreadControlFlag::Go);
        let chunk_pipeline = ChunkPipeline {
            depot: self.info.clone(),
            session: self.session.clone(),
            cdn: self.cdn.clone(),
            pool: self.pool.clone(),
            tokens: self.tokens.clone(),
            buffers: self.buffers.clone(),
            limiter: self.limiter.clone(),
            retry: self.options.retry_policy.clone(),
            resume: self.resume.clone(),
            progress: self.progress.clone(),
            control: self.control.clone(),
            abort: abort.clone(),
        };

        let workers = ThreadPoolBuilder::new()
            .num_threads(self.options.max_concurrency)
            .build()
            .unwrap_or_else(|_| {
                panic!(
                    "failed to build worker pool with {} threads",
                    self.options.max_concurrency
                )
            });

        let first_error: Mutex<Option<DownloadError>> = Mutex::new(None);
        workers.scope(|scope| {
            for job in jobs {
                let chunk_pipeline = &chunk_pipeline;
                let first_error = &first_error;
                let abort = &abort;
                scope.spawn(move |_| {
                    match chunk_pipeline.run_job(job) {
                        Ok(()) => {}
                        // cancellation is reported once by the caller
                        Err(DownloadError::Cancelled) => {}
                        Err(e) => {
                            error!("chunk {} failed: {e}", job.chunk.id_hex());
                            let mut slot = lock!(first_error);
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            abort.set(DownloadThreadControlFlag::Stop);
                        }
                    }
                });
            }
        });

        // writes are done; checkpoint whatever completed
        self.resume.force_save();

        if let Some(e) = lock!(first_error).take() {
            return Err(e);
        }
        if self.control.is_stopped() {
            return Err(DownloadError::Cancelled);
        }
        Ok(())
    }
}
