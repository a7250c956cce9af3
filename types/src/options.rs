use std::{path::PathBuf, time::Duration};

use rand::Rng;
use utils::control_flag::DownloadThreadControl;

use crate::{AppId, DEFAULT_BRANCH, DepotId, DownloadError, ManifestId};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const MAX_CONCURRENCY_LIMIT: usize = 64;

/// Exponential backoff with an optional uniform jitter of +/-25%.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn get_delay(&self, attempt: usize) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter {
            capped * rand::rng().random_range(0.75..=1.25)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

/// Everything the caller can configure about a download run.
#[derive(Clone)]
pub struct DownloadOptions {
    pub app_id: AppId,
    /// Explicit depots to download. A manifest id of [`crate::INVALID_MANIFEST_ID`]
    /// means "latest on the selected branch".
    pub depot_manifest_pairs: Vec<(DepotId, ManifestId)>,
    pub branch: String,
    pub branch_password: Option<String>,
    pub os: Option<String>,
    pub architecture: Option<String>,
    pub language: Option<String>,
    pub download_all_platforms: bool,
    pub download_all_archs: bool,
    pub download_all_languages: bool,
    pub low_violence: bool,
    pub install_dir: Option<PathBuf>,
    pub file_include_paths: Vec<String>,
    pub file_include_regexes: Vec<String>,
    pub verify_all: bool,
    pub manifest_only: bool,
    pub max_concurrency: usize,
    pub cell_id: u32,
    pub max_bytes_per_second: Option<u64>,
    pub retry_policy: RetryPolicy,
    pub resume: bool,
    pub fail_fast: bool,
    pub verify_disk_space: bool,
    pub cancellation: DownloadThreadControl,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            app_id: 0,
            depot_manifest_pairs: Vec::new(),
            branch: DEFAULT_BRANCH.to_string(),
            branch_password: None,
            os: None,
            architecture: None,
            language: None,
            download_all_platforms: false,
            download_all_archs: false,
            download_all_languages: false,
            low_violence: false,
            install_dir: None,
            file_include_paths: Vec::new(),
            file_include_regexes: Vec::new(),
            verify_all: false,
            manifest_only: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cell_id: 0,
            max_bytes_per_second: None,
            retry_policy: RetryPolicy::default(),
            resume: true,
            fail_fast: false,
            verify_disk_space: true,
            cancellation: DownloadThreadControl::default(),
        }
    }
}

impl DownloadOptions {
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY_LIMIT {
            return Err(DownloadError::InvalidInput(format!(
                "max_concurrency must be within 1..={MAX_CONCURRENCY_LIMIT}, got {}",
                self.max_concurrency
            )));
        }
        if self.manifest_only && self.verify_all {
            return Err(DownloadError::InvalidInput(
                "manifest_only and verify_all are mutually exclusive".to_string(),
            ));
        }
        if self.branch_password.is_some() && self.branch.eq_ignore_ascii_case(DEFAULT_BRANCH) {
            return Err(DownloadError::InvalidInput(
                "a branch password requires a non-default branch".to_string(),
            ));
        }
        Ok(())
    }

    /// OS label used against depot `oslist` filters. FreeBSD reports as linux.
    pub fn target_os(&self) -> String {
        match &self.os {
            Some(os) => os.to_lowercase(),
            None => match std::env::consts::OS {
                "macos" => "macos".to_string(),
                "windows" => "windows".to_string(),
                _ => "linux".to_string(),
            },
        }
    }

    pub fn target_arch(&self) -> String {
        match &self.architecture {
            Some(arch) => arch.clone(),
            None => {
                if cfg!(target_pointer_width = "64") {
                    "64".to_string()
                } else {
                    "32".to_string()
                }
            }
        }
    }

    pub fn target_language(&self) -> String {
        self.language
            .clone()
            .unwrap_or_else(|| "english".to_string())
            .to_lowercase()
    }

    /// `None` and non-positive rates both mean unlimited.
    pub fn effective_rate_limit(&self) -> Option<u64> {
        self.max_bytes_per_second.filter(|r| *r > 0)
    }
}
