use std::{
    fmt::{Display, Formatter},
    io,
    path::PathBuf,
    sync::Arc,
};

use humansize::{BINARY, format_size};
use serde_with::SerializeDisplay;

/// Error taxonomy of the content engine. Every kind maps 1:1 to a process
/// exit classification for the surrounding CLI.
#[derive(Debug, Clone, SerializeDisplay)]
pub enum DownloadError {
    AuthRequired,
    NotLoggedIn,
    PermissionDenied(String),
    NotFound(String),
    InvalidInput(String),
    InvalidManifest(String),
    ChecksumMismatch(String),
    Io(Arc<io::Error>),
    InsufficientSpace {
        required: u64,
        available: u64,
        drive: PathBuf,
    },
    Network(String),
    HttpStatus(u16),
    Cancelled,
    NoServers,
    RetryExhausted(String),
}

impl DownloadError {
    /// Stable exit classification consumed by the CLI collaborator.
    pub fn exit_code(&self) -> u8 {
        match self {
            DownloadError::AuthRequired => 10,
            DownloadError::NotLoggedIn => 11,
            DownloadError::PermissionDenied(_) => 12,
            DownloadError::NotFound(_) => 13,
            DownloadError::InvalidInput(_) => 14,
            DownloadError::InvalidManifest(_) => 15,
            DownloadError::ChecksumMismatch(_) => 16,
            DownloadError::Io(_) => 17,
            DownloadError::InsufficientSpace { .. } => 18,
            DownloadError::Network(_) => 19,
            DownloadError::HttpStatus(_) => 20,
            DownloadError::Cancelled => 21,
            DownloadError::NoServers => 22,
            DownloadError::RetryExhausted(_) => 23,
        }
    }

    /// Transport-level failures are retried locally against another server;
    /// everything else surfaces to the depot or the whole operation.
    pub fn is_transport(&self) -> bool {
        match self {
            DownloadError::Network(_) | DownloadError::ChecksumMismatch(_) => true,
            DownloadError::HttpStatus(code) => *code >= 500,
            _ => false,
        }
    }
}

impl Display for DownloadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadError::AuthRequired => write!(f, "authentication required"),
            DownloadError::NotLoggedIn => {
                write!(f, "the session must be logged on before downloading")
            }
            DownloadError::PermissionDenied(what) => write!(f, "access denied: {what}"),
            DownloadError::NotFound(what) => write!(f, "not found: {what}"),
            DownloadError::InvalidInput(what) => write!(f, "invalid options: {what}"),
            DownloadError::InvalidManifest(what) => write!(f, "invalid manifest: {what}"),
            DownloadError::ChecksumMismatch(what) => write!(f, "checksum mismatch: {what}"),
            DownloadError::Io(error) => write!(f, "io error: {error}"),
            DownloadError::InsufficientSpace {
                required,
                available,
                drive,
            } => write!(
                f,
                "download requires {}, {} remaining on {}",
                format_size(*required, BINARY),
                format_size(*available, BINARY),
                drive.display(),
            ),
            DownloadError::Network(what) => write!(f, "network error: {what}"),
            DownloadError::HttpStatus(code) => write!(f, "content server returned HTTP {code}"),
            DownloadError::Cancelled => write!(f, "download cancelled"),
            DownloadError::NoServers => {
                write!(f, "no eligible content servers are available")
            }
            DownloadError::RetryExhausted(what) => {
                write!(f, "retries exhausted: {what}")
            }
        }
    }
}

impl From<io::Error> for DownloadError {
    fn from(value: io::Error) -> Self {
        DownloadError::Io(Arc::new(value))
    }
}

impl std::error::Error for DownloadError {}
