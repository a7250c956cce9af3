use adler32::RollingAdler32;
use sha1::{Digest, Sha1};

use crate::{ChunkEntry, DownloadError};

pub fn sha1_of(bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn adler32_of(bytes: &[u8]) -> u32 {
    let mut hasher = RollingAdler32::new();
    hasher.update_buffer(bytes);
    hasher.hash()
}

/// Full plaintext check for a delivered chunk: exact length, Adler32 and
/// chunk-id SHA-1 must all hold before the bytes may reach the file writer.
pub fn verify_chunk(plaintext: &[u8], chunk: &ChunkEntry) -> Result<(), DownloadError> {
    if plaintext.len() != chunk.uncompressed_length as usize {
        return Err(DownloadError::ChecksumMismatch(format!(
            "chunk {} length {} != expected {}",
            chunk.id_hex(),
            plaintext.len(),
            chunk.uncompressed_length
        )));
    }
    if adler32_of(plaintext) != chunk.checksum {
        return Err(DownloadError::ChecksumMismatch(format!(
            "chunk {} failed adler32 validation",
            chunk.id_hex()
        )));
    }
    if sha1_of(plaintext) != chunk.id {
        return Err(DownloadError::ChecksumMismatch(format!(
            "chunk {} failed sha1 validation",
            chunk.id_hex()
        )));
    }
    Ok(())
}
