pub mod app_info;
pub mod codec;
pub mod error;
pub mod manifest;
pub mod options;
pub mod plan;
pub mod progress;
pub mod server;
pub mod ui;
pub mod verify;

pub type AppId = u32;
pub type DepotId = u32;
pub type ManifestId = u64;

/// Sentinel manifest id meaning "latest for the selected branch".
pub const INVALID_MANIFEST_ID: ManifestId = u64::MAX;

pub const DEFAULT_BRANCH: &str = "public";

pub use app_info::{AppInfo, BranchInfo, DepotSection, PackageInfo};
pub use error::DownloadError;
pub use manifest::{ChunkEntry, FileEntry, FileFlags, Manifest};
pub use options::{DownloadOptions, RetryPolicy};
pub use plan::{DepotDownloadInfo, DepotFailure, DepotOutcome, DepotPlan, DownloadPlan, DownloadResult};
pub use progress::ProgressEvent;
pub use server::{CdnServer, CdnServerType};
pub use ui::{LogSink, UiSink};
