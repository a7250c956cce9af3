use std::{
    fs::{File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

/// Serializes chunk writes into one target file. The handle opens lazily on
/// the first write and is released when the outstanding-chunk counter hits
/// zero, so error paths can never leak or double-close it.
pub struct FileWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
    outstanding: AtomicUsize,
}

impl FileWriter {
    pub fn new(path: PathBuf, outstanding_chunks: usize) -> Self {
        Self {
            path,
            file: Mutex::new(None),
            outstanding: AtomicUsize::new(outstanding_chunks),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = Some(OpenOptions::new().write(true).open(&self.path)?);
        }
        let file = guard.as_mut().expect("file opened above");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    /// Marks one chunk as finished. Returns true exactly once, when the last
    /// outstanding chunk completes; the handle is closed at that point.
    pub fn complete_chunk(&self) -> bool {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            *self.file.lock() = None;
            true
        } else {
            false
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_land_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::File::create(&path).unwrap().set_len(8).unwrap();

        let writer = FileWriter::new(path.clone(), 2);
        writer.write_at(4, b"BBBB").unwrap();
        writer.write_at(0, b"AAAA").unwrap();
        assert!(!writer.complete_chunk());
        assert!(writer.complete_chunk());
        assert!(writer.file.lock().is_none());

        assert_eq!(std::fs::read(&path).unwrap(), b"AAAABBBB");
    }
}
