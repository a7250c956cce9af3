pub mod port;
pub mod request_code;
pub mod token_cache;

pub use port::{CdnAuthToken, DepotKey, SessionPort, SessionState};
pub use request_code::ManifestRequestCodeCache;
pub use token_cache::CdnAuthTokenCache;
