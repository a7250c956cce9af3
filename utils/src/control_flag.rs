use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadThreadControlFlag {
    Go,
    Stop,
}

/// Shared control flag checked by every worker between suspension points.
/// Setting it to Stop is the only cancellation mechanism; workers observe it
/// at the top of each retry loop and never start new work afterwards.
#[derive(Debug, Clone)]
pub struct DownloadThreadControl {
    inner: Arc<AtomicBool>,
}

impl DownloadThreadControl {
    pub fn new(flag: DownloadThreadControlFlag) -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(flag == DownloadThreadControlFlag::Go)),
        }
    }

    pub fn get(&self) -> DownloadThreadControlFlag {
        if self.inner.load(Ordering::Acquire) {
            DownloadThreadControlFlag::Go
        } else {
            DownloadThreadControlFlag::Stop
        }
    }

    pub fn set(&self, flag: DownloadThreadControlFlag) {
        self.inner
            .store(flag == DownloadThreadControlFlag::Go, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == DownloadThreadControlFlag::Stop
    }
}

impl Default for DownloadThreadControl {
    fn default() -> Self {
        Self::new(DownloadThreadControlFlag::Go)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_shared_between_clones() {
        let control = DownloadThreadControl::new(DownloadThreadControlFlag::Go);
        let other = control.clone();
        other.set(DownloadThreadControlFlag::Stop);
        assert!(control.is_stopped());
    }
}
