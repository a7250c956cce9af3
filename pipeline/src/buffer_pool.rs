use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use parking_lot::Mutex;

/// Chunk buffers round up to the nearest power of two, never below 1 MiB.
const MIN_BUFFER_SIZE: usize = 1024 * 1024;

type Buckets = Arc<Mutex<HashMap<usize, Vec<Vec<u8>>>>>;

/// Pool of reusable chunk buffers, bucketed by capacity. Buffers come back
/// on every exit path because the handle returns itself on drop; a buffer
/// lost to a panicking worker is simply reallocated later.
#[derive(Default)]
pub struct BufferPool {
    buckets: Buckets,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bucket_for(len: usize) -> usize {
        len.max(MIN_BUFFER_SIZE).next_power_of_two()
    }

    pub fn acquire(&self, len: usize) -> PooledBuffer {
        let capacity = Self::bucket_for(len);
        let buf = self
            .buckets
            .lock()
            .get_mut(&capacity)
            .and_then(Vec::pop)
            .unwrap_or_else(|| vec![0u8; capacity]);
        PooledBuffer {
            buf: Some(buf),
            len,
            buckets: self.buckets.clone(),
        }
    }
}

/// Scoped view of a pooled buffer, sized to the requested length.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    len: usize,
    buckets: Buckets,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buf.as_ref().expect("buffer taken")[..self.len]
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf.as_mut().expect("buffer taken")[..self.len]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.buckets.lock().entry(buf.len()).or_default().push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused_by_bucket() {
        let pool = BufferPool::new();
        {
            let buffer = pool.acquire(100);
            assert_eq!(buffer.len(), 100);
        }
        assert_eq!(pool.buckets.lock().get(&MIN_BUFFER_SIZE).map(Vec::len), Some(1));

        let buffer = pool.acquire(MIN_BUFFER_SIZE / 2);
        assert_eq!(buffer.len(), MIN_BUFFER_SIZE / 2);
        assert_eq!(pool.buckets.lock().get(&MIN_BUFFER_SIZE).map(Vec::len), Some(0));
    }

    #[test]
    fn oversized_requests_round_to_power_of_two() {
        let pool = BufferPool::new();
        let buffer = pool.acquire(MIN_BUFFER_SIZE + 1);
        assert_eq!(buffer.len(), MIN_BUFFER_SIZE + 1);
        drop(buffer);
        assert!(pool.buckets.lock().contains_key(&(MIN_BUFFER_SIZE * 2)));
    }
}
