use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::Path,
};

use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};

/// Writes a deflate-compressed, length-prefixed payload with temp + rename so
/// readers never observe a half-written store.
pub(crate) fn write_blob(path: &Path, payload: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "store path has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut encoder = DeflateEncoder::new(tmp.as_file_mut(), Compression::default());
        encoder.write_all(&(payload.len() as u32).to_le_bytes())?;
        encoder.write_all(payload)?;
        encoder.finish()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub(crate) fn read_blob(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut decoder = DeflateDecoder::new(file);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;

    if raw.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "store payload is truncated",
        ));
    }
    let declared = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let body = raw.split_off(4);
    if body.len() != declared {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("store length mismatch: declared {declared}, got {}", body.len()),
        ));
    }
    Ok(body)
}
