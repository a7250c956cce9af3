use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct BucketState {
    available: f64,
    last_refill: Instant,
}

/// Token bucket shared by every chunk worker. Capacity is one second of
/// bytes at the configured rate; refill is continuous. Waits are serialized
/// so the combined consumption of all workers stays at the configured rate
/// under load.
pub struct SpeedLimiter {
    rate: u64,
    capacity: u64,
    state: Mutex<BucketState>,
    turn: Mutex<()>,
}

impl SpeedLimiter {
    /// `rate` must be positive; callers treat non-positive rates as
    /// unlimited and construct no limiter at all.
    pub fn new(rate: u64) -> Self {
        assert!(rate > 0, "speed limiter requires a positive rate");
        Self {
            rate,
            capacity: rate,
            state: Mutex::new(BucketState {
                available: rate as f64,
                last_refill: Instant::now(),
            }),
            turn: Mutex::new(()),
        }
    }

    /// Blocks until `bytes` tokens have been consumed. Requests larger than
    /// the bucket drain it in capacity-sized slices.
    pub fn wait(&self, bytes: u64) {
        let _turn = self.turn.lock();
        let mut remaining = bytes;
        while remaining > 0 {
            let slice = remaining.min(self.capacity);
            self.wait_slice(slice);
            remaining -= slice;
        }
    }

    fn wait_slice(&self, bytes: u64) {
        loop {
            let deficit = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let refill = now.duration_since(state.last_refill).as_secs_f64() * self.rate as f64;
                state.available = (state.available + refill).min(self.capacity as f64);
                state.last_refill = now;

                if state.available >= bytes as f64 {
                    state.available -= bytes as f64;
                    return;
                }
                bytes as f64 - state.available
            };

            let sleep_ms = (deficit * 1000.0 / self.rate as f64).ceil() as u64;
            std::thread::sleep(Duration::from_millis(sleep_ms.max(1)));
        }
    }
}
