use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use throttle_my_fn::throttle;
use types::{DepotId, ProgressEvent, UiSink};

/// Throughput is computed over a sliding window of samples this old.
const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Shared run counters plus the sliding throughput window behind the
/// progress events. Byte counters only ever grow during a run.
pub struct ProgressTracker {
    total_bytes: AtomicU64,
    bytes_downloaded: AtomicU64,
    bytes_compressed: AtomicU64,
    files_completed: AtomicUsize,
    total_files: AtomicUsize,
    current_depot: AtomicU32,
    current_file: Mutex<Option<String>>,
    window: Mutex<VecDeque<(Instant, u64)>>,
    sink: Arc<dyn UiSink>,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn UiSink>) -> Arc<Self> {
        Arc::new(Self {
            total_bytes: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            bytes_compressed: AtomicU64::new(0),
            files_completed: AtomicUsize::new(0),
            total_files: AtomicUsize::new(0),
            current_depot: AtomicU32::new(0),
            current_file: Mutex::new(None),
            window: Mutex::new(VecDeque::new()),
            sink,
        })
    }

    pub fn begin_depot(&self, depot_id: DepotId, depot_bytes: u64, depot_files: usize) {
        self.current_depot.store(depot_id, Ordering::Release);
        self.total_bytes.fetch_add(depot_bytes, Ordering::AcqRel);
        self.total_files.fetch_add(depot_files, Ordering::AcqRel);
    }

    pub fn set_current_file(&self, path: &str) {
        *self.current_file.lock() = Some(path.to_string());
    }

    pub fn file_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::AcqRel);
    }

    /// Bytes fetched over the wire; feeds the throughput window.
    pub fn add_bytes(&self, uncompressed: u64, compressed: u64) {
        let total = self.bytes_downloaded.fetch_add(uncompressed, Ordering::AcqRel) + uncompressed;
        self.bytes_compressed.fetch_add(compressed, Ordering::AcqRel);
        {
            let mut window = self.window.lock();
            let now = Instant::now();
            window.push_back((now, total));
            while let Some((at, _)) = window.front()
                && now.duration_since(*at) > SPEED_WINDOW
            {
                window.pop_front();
            }
        }
        let _ = push_progress(self);
    }

    /// Bytes satisfied from disk without a fetch; no throughput sample.
    pub fn skip_bytes(&self, uncompressed: u64) {
        self.bytes_downloaded.fetch_add(uncompressed, Ordering::AcqRel);
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Acquire)
    }

    pub fn bytes_compressed(&self) -> u64 {
        self.bytes_compressed.load(Ordering::Acquire)
    }

    fn speed_bytes_per_second(&self) -> u64 {
        let window = self.window.lock();
        let (Some((first_at, first_bytes)), Some((last_at, last_bytes))) =
            (window.front(), window.back())
        else {
            return 0;
        };
        let elapsed = last_at.duration_since(*first_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }
        ((last_bytes - first_bytes) as f64 / elapsed) as u64
    }

    pub fn snapshot(&self) -> ProgressEvent {
        let bytes_downloaded = self.bytes_downloaded();
        let total_bytes = self.total_bytes.load(Ordering::Acquire);
        let speed = self.speed_bytes_per_second();
        let remaining = total_bytes.saturating_sub(bytes_downloaded);
        let estimated_time_remaining = if speed == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(remaining as f64 / speed as f64))
        };
        ProgressEvent {
            bytes_downloaded,
            total_bytes,
            current_file: self.current_file.lock().clone(),
            files_completed: self.files_completed.load(Ordering::Acquire),
            total_files: self.total_files.load(Ordering::Acquire),
            speed_bytes_per_second: speed,
            estimated_time_remaining,
            current_depot_id: self.current_depot.load(Ordering::Acquire),
        }
    }
}

#[throttle(1, Duration::from_millis(250))]
fn push_progress(tracker: &ProgressTracker) {
    let event = tracker.snapshot();
    tracker.sink.update_progress("downloading", event.percent());
    tracker.sink.on_progress_event(&event);
}
