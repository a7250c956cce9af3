//! Content engine for downloading versioned depot content from the Steam
//! CDN: plan which depots and manifests to fetch, reconcile them against the
//! disk, drain the chunk queue through a penalized server pool, and commit
//! installed state atomically.
//!
//! The Steam wire protocol and the surrounding CLI live behind the
//! [`session::SessionPort`], [`cdn::CdnClient`] and [`types::UiSink`] ports;
//! the engine is correct against any implementation of them.

pub mod context;
pub mod downloader;

pub use context::CoreContext;
pub use downloader::ContentDownloader;

pub use cdn::{CdnClient, HttpCdnClient, ServerPool};
pub use depot::{DepotDownloadAgent, InstallFilter, ManifestFetcher, PlannedDepot, Planner};
pub use pipeline::{BufferPool, ProgressTracker, SpeedLimiter};
pub use session::{CdnAuthToken, DepotKey, SessionPort, SessionState};
pub use stores::{AccountSettingsStore, InstalledManifestStore, ManifestCache, ResumeStore};
pub use types::{
    AppId, CdnServer, CdnServerType, ChunkEntry, DepotDownloadInfo, DepotFailure, DepotId,
    DepotOutcome, DepotPlan, DownloadError, DownloadOptions, DownloadPlan, DownloadResult,
    FileEntry, FileFlags, INVALID_MANIFEST_ID, LogSink, Manifest, ManifestId, ProgressEvent,
    RetryPolicy, UiSink,
};
pub use utils::control_flag::{DownloadThreadControl, DownloadThreadControlFlag};
