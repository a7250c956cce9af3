use std::collections::HashSet;

use regex::Regex;
use types::{DownloadError, DownloadOptions};
use utils::path::normalize_slashes;

/// Compiled include filter over slash-normalized manifest paths. With no
/// paths and no patterns configured, every file is included.
pub struct InstallFilter {
    paths: HashSet<String>,
    regexes: Vec<Regex>,
}

impl InstallFilter {
    pub fn from_options(options: &DownloadOptions) -> Result<Self, DownloadError> {
        let paths = options
            .file_include_paths
            .iter()
            .map(|p| normalize_slashes(p))
            .collect();
        let regexes = options
            .file_include_regexes
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    DownloadError::InvalidInput(format!("bad include pattern {pattern:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { paths, regexes })
    }

    pub fn is_included(&self, path: &str) -> bool {
        if self.paths.is_empty() && self.regexes.is_empty() {
            return true;
        }
        let normalized = normalize_slashes(path);
        self.paths.contains(&normalized) || self.regexes.iter().any(|rx| rx.is_match(&normalized))
    }
}
