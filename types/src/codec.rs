use std::io::{Read, Write};

use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};

use crate::{DownloadError, Manifest};

/// Magic prefix of the engine's serialized manifest form.
const MANIFEST_MAGIC: &[u8; 4] = b"DPMF";
const MANIFEST_VERSION: u8 = 1;

/// Serializes a manifest into the engine's canonical binary form: a magic
/// header followed by a deflate stream of the length-prefixed bitcode payload.
/// This is the byte form the manifest cache persists and hashes.
pub fn encode_manifest(manifest: &Manifest) -> Result<Vec<u8>, DownloadError> {
    let payload = bitcode::encode(manifest);

    let mut out = Vec::with_capacity(payload.len() / 2 + 16);
    out.extend_from_slice(MANIFEST_MAGIC);
    out.push(MANIFEST_VERSION);

    let mut encoder = DeflateEncoder::new(out, Compression::default());
    encoder.write_all(&(payload.len() as u32).to_le_bytes())?;
    encoder.write_all(&payload)?;
    Ok(encoder.finish()?)
}

pub fn decode_manifest(bytes: &[u8]) -> Result<Manifest, DownloadError> {
    if bytes.len() < 5 || &bytes[0..4] != MANIFEST_MAGIC {
        return Err(DownloadError::InvalidManifest(
            "bad magic in serialized manifest".to_string(),
        ));
    }
    if bytes[4] != MANIFEST_VERSION {
        return Err(DownloadError::InvalidManifest(format!(
            "unsupported serialized manifest version {}",
            bytes[4]
        )));
    }

    let mut decoder = DeflateDecoder::new(&bytes[5..]);
    let mut payload = Vec::new();
    decoder.read_to_end(&mut payload)?;

    if payload.len() < 4 {
        return Err(DownloadError::InvalidManifest(
            "truncated serialized manifest".to_string(),
        ));
    }
    let declared = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let body = &payload[4..];
    if body.len() != declared {
        return Err(DownloadError::InvalidManifest(format!(
            "manifest payload length mismatch: declared {declared}, got {}",
            body.len()
        )));
    }

    bitcode::decode(body)
        .map_err(|e| DownloadError::InvalidManifest(format!("manifest decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkEntry, FileEntry, FileFlags};

    fn sample_manifest() -> Manifest {
        Manifest {
            depot_id: 731,
            manifest_id: 0x1122_3344_5566_7788,
            creation_time: 1_700_000_000,
            total_compressed: 900,
            total_uncompressed: 1024,
            files: vec![FileEntry {
                path: "bin/game.exe".into(),
                total_size: 1024,
                hash: [3u8; 20],
                flags: FileFlags::EXECUTABLE,
                link_target: None,
                chunks: vec![ChunkEntry {
                    id: [9u8; 20],
                    offset: 0,
                    uncompressed_length: 1024,
                    compressed_length: 900,
                    checksum: 0xdead_beef,
                }],
            }],
        }
    }

    #[test]
    fn encoded_manifest_survives_decode() {
        let manifest = sample_manifest();
        let bytes = encode_manifest(&manifest).unwrap();
        assert_eq!(decode_manifest(&bytes).unwrap(), manifest);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_manifest(b"not a manifest").is_err());
        let mut bytes = encode_manifest(&sample_manifest()).unwrap();
        bytes[4] = 99;
        assert!(decode_manifest(&bytes).is_err());
    }
}
