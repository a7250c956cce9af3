pub mod buffer_pool;
pub mod progress;
pub mod speed_limiter;
pub mod worker;
pub mod writer;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use progress::ProgressTracker;
pub use speed_limiter::SpeedLimiter;
pub use worker::{ChunkJob, ChunkPipeline};
pub use writer::FileWriter;
