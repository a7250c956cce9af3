pub mod client;
pub mod crypto;
pub mod http;
pub mod pool;

pub use client::CdnClient;
pub use http::HttpCdnClient;
pub use pool::ServerPool;
