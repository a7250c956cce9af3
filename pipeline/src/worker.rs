use std::sync::Arc;

use cdn::{CdnClient, ServerPool};
use log::{debug, warn};
use session::{CdnAuthTokenCache, SessionPort};
use stores::ResumeStore;
use types::{
    ChunkEntry, DepotDownloadInfo, DownloadError, RetryPolicy, verify,
};
use utils::control_flag::DownloadThreadControl;

use crate::{BufferPool, FileWriter, ProgressTracker, SpeedLimiter};

/// One unit of fetch work: a chunk and the writer of the file it lands in.
pub struct ChunkJob {
    /// Slash-normalized manifest path, for resume bookkeeping and progress.
    pub file_path: String,
    pub chunk: ChunkEntry,
    pub writer: Arc<FileWriter>,
}

impl ChunkJob {
    /// Resume-store key. Includes path and offset so a chunk id occurring at
    /// several offsets never causes a sibling instance to be skipped.
    pub fn resume_key(&self) -> String {
        format!("{}:{}:{}", self.file_path, self.chunk.id_hex(), self.chunk.offset)
    }
}

/// Everything a chunk worker needs, shared across the depot's worker pool.
pub struct ChunkPipeline {
    pub depot: DepotDownloadInfo,
    pub session: Arc<dyn SessionPort>,
    pub cdn: Arc<dyn CdnClient>,
    pub pool: Arc<ServerPool>,
    pub tokens: Arc<CdnAuthTokenCache>,
    pub buffers: Arc<BufferPool>,
    pub limiter: Option<Arc<SpeedLimiter>>,
    pub retry: RetryPolicy,
    pub resume: Arc<ResumeStore>,
    pub progress: Arc<ProgressTracker>,
    /// Run-wide cancellation, set by the caller of the whole download.
    pub control: DownloadThreadControl,
    /// Depot-local abort, set when a sibling chunk fails terminally.
    pub abort: DownloadThreadControl,
}

impl ChunkPipeline {
    fn stopped(&self) -> bool {
        self.control.is_stopped() || self.abort.is_stopped()
    }

    /// Runs the full per-chunk protocol: resume check, fetch with retries,
    /// verification, rate limiting, serialized write, bookkeeping.
    pub fn run_job(&self, job: &ChunkJob) -> Result<(), DownloadError> {
        if self.stopped() {
            return Err(DownloadError::Cancelled);
        }

        if self
            .resume
            .is_chunk_complete(self.depot.depot_id, &job.resume_key())
        {
            self.progress
                .skip_bytes(job.chunk.uncompressed_length as u64);
            self.finish_chunk(job);
            return Ok(());
        }

        let mut buffer = self
            .buffers
            .acquire(job.chunk.uncompressed_length as usize);
        let written = self.fetch_verified(job, &mut buffer)?;

        if let Some(limiter) = &self.limiter {
            limiter.wait(written as u64);
        }

        job.writer.write_at(job.chunk.offset, &buffer[..written])?;

        self.resume
            .mark_chunk_complete(self.depot.depot_id, &job.resume_key(), written as u64);
        self.progress.set_current_file(&job.file_path);
        self.progress
            .add_bytes(written as u64, job.chunk.compressed_length as u64);
        self.finish_chunk(job);
        Ok(())
    }

    fn finish_chunk(&self, job: &ChunkJob) {
        if job.writer.complete_chunk() {
            self.resume
                .mark_file_complete(self.depot.depot_id, &job.file_path);
            self.progress.file_completed();
        }
    }

    /// Fetch loop: rotate through the CDN pool, requesting an auth token at
    /// most once on a bare 403, penalizing servers that fail, and verifying
    /// the plaintext before it may be written.
    fn fetch_verified(&self, job: &ChunkJob, dst: &mut [u8]) -> Result<usize, DownloadError> {
        let depot_id = self.depot.depot_id;
        let mut attempts = 0usize;
        let mut token_requested = false;

        loop {
            if self.stopped() {
                return Err(DownloadError::Cancelled);
            }

            let server = self.pool.get_connection();
            let token = self.tokens.cached(depot_id, &server.host);

            let result = self.cdn.download_chunk(
                depot_id,
                &job.chunk,
                &server,
                dst,
                &self.depot.depot_key,
                self.pool.proxy(),
                token.as_deref(),
            );

            let error = match result {
                Ok(written) if written > 0 => {
                    match verify::verify_chunk(&dst[..written], &job.chunk) {
                        Ok(()) => {
                            self.pool.return_connection(&server);
                            return Ok(written);
                        }
                        Err(e) => e,
                    }
                }
                Ok(_) => DownloadError::Network(format!(
                    "server {} returned an empty chunk",
                    server.host
                )),
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(DownloadError::HttpStatus(403))
                    if token.is_none() && !token_requested =>
                {
                    token_requested = true;
                    match self.tokens.request(
                        self.session.as_ref(),
                        self.depot.containing_app_id,
                        depot_id,
                        &server.host,
                    ) {
                        Ok(_) => {
                            // the server itself did nothing wrong
                            self.pool.return_connection(&server);
                            continue;
                        }
                        Err(e) => {
                            warn!("cdn auth token request failed: {e}");
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            self.pool.return_broken_connection(&server);
            attempts += 1;

            let terminal = matches!(
                error,
                DownloadError::HttpStatus(401) | DownloadError::HttpStatus(403) | DownloadError::HttpStatus(404)
            );
            if attempts > self.retry.max_retries {
                debug!(
                    "chunk {} failed after {attempts} attempts: {error}",
                    job.chunk.id_hex()
                );
                return Err(if terminal || !error.is_transport() {
                    error
                } else {
                    DownloadError::RetryExhausted(format!(
                        "chunk {}: {error}",
                        job.chunk.id_hex()
                    ))
                });
            }

            if !terminal {
                std::thread::sleep(self.retry.get_delay(attempts - 1));
            }
        }
    }
}
