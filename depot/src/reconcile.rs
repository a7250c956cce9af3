use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};
use pipeline::{ChunkJob, FileWriter};
use stores::ResumeStore;
use types::{ChunkEntry, DepotDownloadInfo, DepotId, DownloadError, FileEntry, Manifest, verify};
use utils::path::to_native;

use crate::filter::InstallFilter;

/// Outcome of reconciling a depot against the disk: the chunks that still
/// need fetching, reuse accounting, and files to delete after commit.
pub struct DepotWork {
    pub jobs: Vec<ChunkJob>,
    /// Uncompressed bytes that must come over the wire.
    pub bytes_to_fetch: u64,
    /// Uncompressed bytes satisfied from disk.
    pub bytes_reused: u64,
    /// Included non-directory files in the target manifest.
    pub files_total: usize,
    /// Files that needed no chunks at all.
    pub files_already_complete: usize,
    /// Present in the previous manifest but not the new one; removed only
    /// after the depot commits.
    pub stale_files: Vec<PathBuf>,
}

/// Diffs the target manifest against the previous install and the on-disk
/// tree, reusing every chunk that still validates.
///
/// `claims` maps normalized paths to the depot that owns them when several
/// depots share one install directory; the caller feeds depots in reverse
/// order, which is only safe because sibling depots are assumed not to ship
/// conflicting content for the same path.
pub fn reconcile_depot(
    info: &DepotDownloadInfo,
    manifest: &Manifest,
    previous: Option<&Manifest>,
    verify_all: bool,
    filter: &InstallFilter,
    claims: &mut HashMap<String, DepotId>,
    resume: &ResumeStore,
) -> Result<DepotWork, DownloadError> {
    let install_dir = &info.install_dir;
    fs::create_dir_all(install_dir)?;
    let staging_root = stores::staging_dir(install_dir);
    fs::create_dir_all(&staging_root)?;

    let previous_by_path: HashMap<&str, &FileEntry> = previous
        .map(|m| m.files_by_path())
        .unwrap_or_default();

    let mut work = DepotWork {
        jobs: Vec::new(),
        bytes_to_fetch: 0,
        bytes_reused: 0,
        files_total: 0,
        files_already_complete: 0,
        stale_files: Vec::new(),
    };

    for entry in &manifest.files {
        if !filter.is_included(&entry.path) {
            continue;
        }
        match claims.get(&entry.path) {
            Some(owner) if *owner != info.depot_id => {
                debug!(
                    "{} is already claimed by depot {owner}, skipping",
                    entry.path
                );
                continue;
            }
            _ => {
                claims.insert(entry.path.clone(), info.depot_id);
            }
        }

        let final_path = install_dir.join(to_native(&entry.path));

        if entry.flags.is_directory() {
            fs::create_dir_all(&final_path)?;
            continue;
        }

        if entry.flags.is_symlink() {
            materialize_symlink(entry, &final_path)?;
            work.files_total += 1;
            work.files_already_complete += 1;
            continue;
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        work.files_total += 1;
        let staging_path = staging_root.join(to_native(&entry.path));
        reconcile_file(
            info,
            entry,
            previous_by_path.get(entry.path.as_str()).copied(),
            verify_all,
            &final_path,
            &staging_path,
            resume,
            &mut work,
        )?;
    }

    if let Some(previous) = previous {
        let current: HashMap<&str, ()> = manifest
            .files
            .iter()
            .map(|f| (f.path.as_str(), ()))
            .collect();
        for old_entry in &previous.files {
            if old_entry.flags.is_directory()
                || !filter.is_included(&old_entry.path)
                || current.contains_key(old_entry.path.as_str())
            {
                continue;
            }
            if let Some(owner) = claims.get(&old_entry.path)
                && *owner != info.depot_id
            {
                continue;
            }
            work.stale_files
                .push(install_dir.join(to_native(&old_entry.path)));
        }
    }

    info!(
        "depot {}: {} file(s), {} chunk(s) to fetch, {} reused byte(s)",
        info.depot_id,
        work.files_total,
        work.jobs.len(),
        work.bytes_reused
    );
    Ok(work)
}

#[allow(clippy::too_many_arguments)]
fn reconcile_file(
    info: &DepotDownloadInfo,
    entry: &FileEntry,
    prev_entry: Option<&FileEntry>,
    verify_all: bool,
    final_path: &Path,
    staging_path: &Path,
    resume: &ResumeStore,
    work: &mut DepotWork,
) -> Result<(), DownloadError> {
    let uncompressed_total: u64 = entry
        .chunks
        .iter()
        .map(|c| c.uncompressed_length as u64)
        .sum();

    if !final_path.exists() {
        // new file: pre-allocate, then fetch everything
        allocate_file(final_path, entry.total_size)?;
        apply_executable_bit(final_path, entry.flags.is_executable())?;
        enqueue(info, entry, final_path, entry.chunks.clone(), resume, work);
        return Ok(());
    }

    match prev_entry {
        Some(prev) if prev.hash == entry.hash && !verify_all => {
            work.bytes_reused += uncompressed_total;
            work.files_already_complete += 1;
            maintain_executable_bit(final_path, Some(prev), entry)?;
            Ok(())
        }
        Some(prev) => {
            reconcile_against_previous(info, entry, prev, final_path, staging_path, resume, work)?;
            maintain_executable_bit(final_path, Some(prev), entry)?;
            Ok(())
        }
        // the file exists on disk but the old manifest never shipped it (or
        // there is no old manifest): validate whatever is there in place
        None => {
            validate_in_place(info, entry, final_path, resume, work)?;
            maintain_executable_bit(final_path, None, entry)?;
            Ok(())
        }
    }
}

/// Chunk-level delta against the previous version of the same file. Chunks
/// whose old bytes still validate are copied through a staging rewrite; the
/// rest are queued for fetch.
fn reconcile_against_previous(
    info: &DepotDownloadInfo,
    entry: &FileEntry,
    prev: &FileEntry,
    final_path: &Path,
    staging_path: &Path,
    resume: &ResumeStore,
    work: &mut DepotWork,
) -> Result<(), DownloadError> {
    let old_by_id: HashMap<&[u8; 20], &ChunkEntry> =
        prev.chunks.iter().map(|c| (&c.id, c)).collect();

    let mut copy_eligible: Vec<(ChunkEntry, u64)> = Vec::new();
    let mut fetch_needed: Vec<ChunkEntry> = Vec::new();

    {
        let mut existing = File::open(final_path)?;
        let mut scratch = Vec::new();
        for chunk in &entry.chunks {
            match old_by_id.get(&chunk.id) {
                Some(old) if read_validates(&mut existing, old, &mut scratch)? => {
                    copy_eligible.push((chunk.clone(), old.offset));
                }
                _ => fetch_needed.push(chunk.clone()),
            }
        }
    }

    if fetch_needed.is_empty() && prev.hash == entry.hash {
        let reused: u64 = entry
            .chunks
            .iter()
            .map(|c| c.uncompressed_length as u64)
            .sum();
        work.bytes_reused += reused;
        work.files_already_complete += 1;
        return Ok(());
    }

    // rewrite through staging: old bytes move aside, reusable chunks are
    // copied into the freshly allocated file at their new offsets
    if let Some(parent) = staging_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let _ = fs::remove_file(staging_path);
    fs::rename(final_path, staging_path)?;
    allocate_file(final_path, entry.total_size)?;

    {
        let mut source = File::open(staging_path)?;
        let mut dest = OpenOptions::new().write(true).open(final_path)?;
        let mut scratch = Vec::new();
        for (chunk, old_offset) in copy_eligible {
            scratch.resize(chunk.uncompressed_length as usize, 0);
            source.seek(SeekFrom::Start(old_offset))?;
            source.read_exact(&mut scratch)?;
            if verify::adler32_of(&scratch) != chunk.checksum {
                warn!(
                    "chunk {} changed underneath us during rewrite, refetching",
                    chunk.id_hex()
                );
                fetch_needed.push(chunk);
                continue;
            }
            dest.seek(SeekFrom::Start(chunk.offset))?;
            dest.write_all(&scratch)?;
            work.bytes_reused += chunk.uncompressed_length as u64;
        }
    }
    fs::remove_file(staging_path)?;

    enqueue(info, entry, final_path, fetch_needed, resume, work);
    Ok(())
}

/// No previous manifest knowledge: size the file and keep every chunk whose
/// on-disk bytes already carry the right Adler32.
fn validate_in_place(
    info: &DepotDownloadInfo,
    entry: &FileEntry,
    final_path: &Path,
    resume: &ResumeStore,
    work: &mut DepotWork,
) -> Result<(), DownloadError> {
    let file = OpenOptions::new().read(true).write(true).open(final_path)?;
    if file.metadata()?.len() != entry.total_size {
        file.set_len(entry.total_size)?;
    }

    let mut file = file;
    let mut scratch = Vec::new();
    let mut fetch_needed = Vec::new();
    for chunk in &entry.chunks {
        if read_validates(&mut file, chunk, &mut scratch)? {
            work.bytes_reused += chunk.uncompressed_length as u64;
        } else {
            fetch_needed.push(chunk.clone());
        }
    }

    enqueue(info, entry, final_path, fetch_needed, resume, work);
    Ok(())
}

/// Reads `chunk.uncompressed_length` bytes at the chunk's offset and checks
/// its Adler32. Short reads simply fail validation.
fn read_validates(
    file: &mut File,
    chunk: &ChunkEntry,
    scratch: &mut Vec<u8>,
) -> Result<bool, DownloadError> {
    scratch.resize(chunk.uncompressed_length as usize, 0);
    file.seek(SeekFrom::Start(chunk.offset))?;
    if file.read_exact(scratch).is_err() {
        return Ok(false);
    }
    Ok(verify::adler32_of(scratch) == chunk.checksum)
}

fn enqueue(
    info: &DepotDownloadInfo,
    entry: &FileEntry,
    final_path: &Path,
    fetch_needed: Vec<ChunkEntry>,
    resume: &ResumeStore,
    work: &mut DepotWork,
) {
    if fetch_needed.is_empty() {
        work.files_already_complete += 1;
        return;
    }

    let writer = Arc::new(FileWriter::new(final_path.to_path_buf(), fetch_needed.len()));
    for chunk in fetch_needed {
        work.bytes_to_fetch += chunk.uncompressed_length as u64;
        let job = ChunkJob {
            file_path: entry.path.clone(),
            chunk,
            writer: writer.clone(),
        };
        // any surviving completion claim for this chunk is stale
        resume.clear_chunk(info.depot_id, &job.resume_key());
        work.jobs.push(job);
    }
}

/// Pre-allocates the file at its final length. Failure to allocate aborts
/// the depot.
fn allocate_file(path: &Path, total_size: u64) -> Result<(), DownloadError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    #[cfg(target_os = "linux")]
    if total_size > 0 {
        let _ = rustix::fs::fallocate(&file, rustix::fs::FallocateFlags::empty(), 0, total_size);
    }
    file.set_len(total_size)?;
    Ok(())
}

fn materialize_symlink(entry: &FileEntry, final_path: &Path) -> Result<(), DownloadError> {
    let Some(target) = &entry.link_target else {
        warn!("{} is flagged as a symlink but has no target", entry.path);
        return Ok(());
    };
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    {
        let _ = fs::remove_file(final_path);
        std::os::unix::fs::symlink(to_native(target), final_path)?;
    }
    #[cfg(not(unix))]
    {
        warn!("skipping symlink {} -> {target} on this platform", entry.path);
    }
    Ok(())
}

fn maintain_executable_bit(
    path: &Path,
    prev: Option<&FileEntry>,
    entry: &FileEntry,
) -> Result<(), DownloadError> {
    let executable = entry.flags.is_executable();
    match prev {
        Some(prev) if prev.flags.is_executable() == executable => Ok(()),
        _ => apply_executable_bit(path, executable),
    }
}

#[cfg(unix)]
fn apply_executable_bit(path: &Path, executable: bool) -> Result<(), DownloadError> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path)?;
    let mut mode = metadata.permissions().mode();
    let currently = mode & 0o111 != 0;
    if currently == executable {
        return Ok(());
    }
    if executable {
        mode |= 0o111;
    } else {
        mode &= !0o111;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_executable_bit(_path: &Path, _executable: bool) -> Result<(), DownloadError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{DownloadOptions, FileFlags};

    fn chunk(data: &[u8], offset: u64) -> ChunkEntry {
        ChunkEntry {
            id: verify::sha1_of(data),
            offset,
            uncompressed_length: data.len() as u32,
            compressed_length: data.len() as u32,
            checksum: verify::adler32_of(data),
        }
    }

    fn file_entry(path: &str, pieces: &[&[u8]], flags: FileFlags) -> (FileEntry, Vec<u8>) {
        let mut chunks = Vec::new();
        let mut bytes = Vec::new();
        for piece in pieces {
            chunks.push(chunk(piece, bytes.len() as u64));
            bytes.extend_from_slice(piece);
        }
        let entry = FileEntry {
            path: path.to_string(),
            total_size: bytes.len() as u64,
            hash: verify::sha1_of(&bytes),
            flags,
            link_target: None,
            chunks,
        };
        (entry, bytes)
    }

    fn manifest_with(files: Vec<FileEntry>) -> Manifest {
        let total: u64 = files.iter().map(|f| f.total_size).sum();
        Manifest {
            depot_id: 731,
            manifest_id: 5,
            creation_time: 1_700_000_000,
            total_compressed: total,
            total_uncompressed: total,
            files,
        }
    }

    fn setup(dir: &Path) -> (DepotDownloadInfo, ResumeStore, InstallFilter) {
        let info = DepotDownloadInfo {
            depot_id: 731,
            containing_app_id: 730,
            manifest_id: 5,
            branch: "public".to_string(),
            install_dir: dir.to_path_buf(),
            depot_key: [0u8; 32],
        };
        let resume = ResumeStore::load_or_create(dir, 730, "public");
        let filter = InstallFilter::from_options(&DownloadOptions::default()).unwrap();
        (info, resume, filter)
    }

    #[test]
    fn fresh_file_is_allocated_and_fully_queued() {
        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());
        let (entry, bytes) = file_entry("data/a.bin", &[b"first", b"second!"], FileFlags::default());
        let manifest = manifest_with(vec![entry]);

        let mut claims = HashMap::new();
        let work =
            reconcile_depot(&info, &manifest, None, false, &filter, &mut claims, &resume).unwrap();

        assert_eq!(work.jobs.len(), 2);
        assert_eq!(work.bytes_to_fetch, bytes.len() as u64);
        assert_eq!(work.files_total, 1);
        let on_disk = dir.path().join("data/a.bin");
        assert_eq!(fs::metadata(&on_disk).unwrap().len(), bytes.len() as u64);
        assert_eq!(claims.get("data/a.bin"), Some(&731));
    }

    #[test]
    fn unchanged_file_needs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());
        let (entry, bytes) = file_entry("a.bin", &[b"stable contents"], FileFlags::default());
        fs::write(dir.path().join("a.bin"), &bytes).unwrap();

        let manifest = manifest_with(vec![entry]);
        let mut claims = HashMap::new();
        let work = reconcile_depot(
            &info,
            &manifest,
            Some(&manifest),
            false,
            &filter,
            &mut claims,
            &resume,
        )
        .unwrap();

        assert!(work.jobs.is_empty());
        assert_eq!(work.files_already_complete, 1);
        assert_eq!(work.bytes_reused, bytes.len() as u64);
    }

    #[test]
    fn delta_copies_surviving_chunks_and_fetches_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());

        let (c1, c2, c3) = (b"chunk-one-bytes".as_slice(), b"chunk-two".as_slice(), b"chunk-three!!".as_slice());
        let (old_entry, old_bytes) = file_entry("a.bin", &[c1, c2, c3], FileFlags::default());
        fs::write(dir.path().join("a.bin"), &old_bytes).unwrap();

        // new layout: c3 moved to the front, c2 replaced, c1 shifted
        let replacement = b"fresh-chunk-bytes".as_slice();
        let (new_entry, new_bytes) = file_entry("a.bin", &[c3, replacement, c1], FileFlags::default());

        let old_manifest = manifest_with(vec![old_entry]);
        let new_manifest = manifest_with(vec![new_entry.clone()]);

        let mut claims = HashMap::new();
        let work = reconcile_depot(
            &info,
            &new_manifest,
            Some(&old_manifest),
            false,
            &filter,
            &mut claims,
            &resume,
        )
        .unwrap();

        // only the replacement chunk goes over the wire
        assert_eq!(work.jobs.len(), 1);
        assert_eq!(work.jobs[0].chunk.id, verify::sha1_of(replacement));
        assert_eq!(work.bytes_reused, (c1.len() + c3.len()) as u64);

        // reused chunks already sit at their new offsets
        let on_disk = fs::read(dir.path().join("a.bin")).unwrap();
        assert_eq!(on_disk.len(), new_bytes.len());
        assert_eq!(&on_disk[..c3.len()], c3);
        assert_eq!(&on_disk[c3.len() + replacement.len()..], c1);

        // staging was cleaned up
        let staged = stores::staging_dir(dir.path()).join("a.bin");
        assert!(!staged.exists());
    }

    #[test]
    fn unknown_file_is_validated_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());

        let good = b"valid chunk data".as_slice();
        let bad = b"expected contents".as_slice();
        let (entry, _) = file_entry("a.bin", &[good, bad], FileFlags::default());

        // first chunk is intact on disk, second is garbage of the same length
        let mut on_disk = good.to_vec();
        on_disk.extend(std::iter::repeat_n(0xAAu8, bad.len()));
        fs::write(dir.path().join("a.bin"), &on_disk).unwrap();

        let manifest = manifest_with(vec![entry]);
        let mut claims = HashMap::new();
        let work =
            reconcile_depot(&info, &manifest, None, false, &filter, &mut claims, &resume).unwrap();

        assert_eq!(work.jobs.len(), 1);
        assert_eq!(work.jobs[0].chunk.id, verify::sha1_of(bad));
        assert_eq!(work.bytes_reused, good.len() as u64);
    }

    #[test]
    fn removed_files_are_listed_for_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());

        let (kept, kept_bytes) = file_entry("kept.bin", &[b"kept"], FileFlags::default());
        let (gone, gone_bytes) = file_entry("gone.bin", &[b"gone"], FileFlags::default());
        fs::write(dir.path().join("kept.bin"), &kept_bytes).unwrap();
        fs::write(dir.path().join("gone.bin"), &gone_bytes).unwrap();

        let old_manifest = manifest_with(vec![kept.clone(), gone]);
        let new_manifest = manifest_with(vec![kept]);

        let mut claims = HashMap::new();
        let work = reconcile_depot(
            &info,
            &new_manifest,
            Some(&old_manifest),
            false,
            &filter,
            &mut claims,
            &resume,
        )
        .unwrap();

        assert_eq!(work.stale_files, vec![dir.path().join("gone.bin")]);
    }

    #[test]
    fn files_claimed_by_sibling_depots_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());
        let (entry, _) = file_entry("shared.bin", &[b"shared"], FileFlags::default());
        let manifest = manifest_with(vec![entry]);

        let mut claims = HashMap::new();
        claims.insert("shared.bin".to_string(), 900u32);
        let work =
            reconcile_depot(&info, &manifest, None, false, &filter, &mut claims, &resume).unwrap();

        assert!(work.jobs.is_empty());
        assert_eq!(work.files_total, 0);
        assert!(!dir.path().join("shared.bin").exists());
        assert_eq!(claims.get("shared.bin"), Some(&900));
    }

    #[cfg(unix)]
    #[test]
    fn executable_flag_sets_the_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());
        let (entry, _) = file_entry("run.sh", &[b"#!/bin/sh\n"], FileFlags::EXECUTABLE);
        let manifest = manifest_with(vec![entry]);

        let mut claims = HashMap::new();
        reconcile_depot(&info, &manifest, None, false, &filter, &mut claims, &resume).unwrap();

        let mode = fs::metadata(dir.path().join("run.sh")).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[test]
    fn verify_all_rechecks_matching_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let (info, resume, filter) = setup(dir.path());
        let piece = b"bytes to be corrupted".as_slice();
        let (entry, bytes) = file_entry("a.bin", &[piece], FileFlags::default());

        // same manifest, but the bytes on disk rotted
        let mut rotten = bytes.clone();
        rotten[0] ^= 0xff;
        fs::write(dir.path().join("a.bin"), &rotten).unwrap();

        let manifest = manifest_with(vec![entry]);
        let mut claims = HashMap::new();
        let work = reconcile_depot(
            &info,
            &manifest,
            Some(&manifest),
            true,
            &filter,
            &mut claims,
            &resume,
        )
        .unwrap();

        assert_eq!(work.jobs.len(), 1);
        assert_eq!(work.bytes_reused, 0);
    }
}
