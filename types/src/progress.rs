use std::time::Duration;

use serde::Serialize;

use crate::DepotId;

/// Snapshot pushed through the progress sink while a depot drains.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub current_file: Option<String>,
    pub files_completed: usize,
    pub total_files: usize,
    pub speed_bytes_per_second: u64,
    /// `None` when throughput is zero; sinks render it as `--:--` when it
    /// exceeds a day.
    #[serde(skip)]
    pub estimated_time_remaining: Option<Duration>,
    pub current_depot_id: DepotId,
}

impl ProgressEvent {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            self.bytes_downloaded as f64 / self.total_bytes as f64 * 100.0
        }
    }
}
