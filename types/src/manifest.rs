use std::collections::HashMap;

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{DepotId, ManifestId};

/// File attribute bits carried by the manifest, Steam wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode)]
pub struct FileFlags(pub u32);

impl FileFlags {
    pub const DIRECTORY: FileFlags = FileFlags(1 << 0);
    pub const EXECUTABLE: FileFlags = FileFlags(1 << 1);
    pub const READONLY: FileFlags = FileFlags(1 << 2);
    pub const SYMLINK: FileFlags = FileFlags(1 << 3);
    pub const HIDDEN: FileFlags = FileFlags(1 << 4);
    pub const CUSTOM_EXECUTABLE: FileFlags = FileFlags(1 << 5);

    pub fn contains(&self, other: FileFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FileFlags) {
        self.0 |= other.0;
    }

    pub fn is_directory(&self) -> bool {
        self.contains(FileFlags::DIRECTORY)
    }

    pub fn is_executable(&self) -> bool {
        self.contains(FileFlags::EXECUTABLE) || self.contains(FileFlags::CUSTOM_EXECUTABLE)
    }

    pub fn is_symlink(&self) -> bool {
        self.contains(FileFlags::SYMLINK)
    }
}

/// A content-addressed slice of a file. `id` is the SHA-1 of the plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ChunkEntry {
    pub id: [u8; 20],
    pub offset: u64,
    pub uncompressed_length: u32,
    pub compressed_length: u32,
    pub checksum: u32,
}

impl ChunkEntry {
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct FileEntry {
    /// Relative, slash-normalized path within the depot tree.
    pub path: String,
    pub total_size: u64,
    pub hash: [u8; 20],
    pub flags: FileFlags,
    /// Symlink target, for entries flagged as symlinks.
    pub link_target: Option<String>,
    pub chunks: Vec<ChunkEntry>,
}

/// The immutable per-depot content inventory at a given build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Manifest {
    pub depot_id: DepotId,
    pub manifest_id: ManifestId,
    /// Unix seconds.
    pub creation_time: u64,
    pub total_compressed: u64,
    pub total_uncompressed: u64,
    pub files: Vec<FileEntry>,
}

impl Manifest {
    /// Index of files by normalized path. Directories are included.
    pub fn files_by_path(&self) -> HashMap<&str, &FileEntry> {
        self.files.iter().map(|f| (f.path.as_str(), f)).collect()
    }

    pub fn total_chunks(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let mut flags = FileFlags::default();
        assert!(!flags.is_executable());
        flags.insert(FileFlags::EXECUTABLE);
        flags.insert(FileFlags::HIDDEN);
        assert!(flags.is_executable());
        assert!(flags.contains(FileFlags::HIDDEN));
        assert!(!flags.is_directory());
    }

    #[test]
    fn files_index_by_path() {
        let file = FileEntry {
            path: "data/a.bin".into(),
            total_size: 16,
            hash: [0u8; 20],
            flags: FileFlags::default(),
            link_target: None,
            chunks: vec![ChunkEntry {
                id: [7u8; 20],
                offset: 0,
                uncompressed_length: 16,
                compressed_length: 12,
                checksum: 1,
            }],
        };
        let manifest = Manifest {
            depot_id: 731,
            manifest_id: 5,
            creation_time: 1_700_000_000,
            total_compressed: 12,
            total_uncompressed: 16,
            files: vec![file.clone()],
        };
        let by_path = manifest.files_by_path();
        assert_eq!(by_path.get("data/a.bin"), Some(&&file));
        assert_eq!(by_path.get("missing.bin"), None);
        assert_eq!(manifest.total_chunks(), 1);
    }
}
