use std::path::{Path, PathBuf};

use sysinfo::Disks;
use types::DownloadError;

/// Available bytes on the drive backing `path`, resolved by the longest
/// mount-point prefix. The path does not need to exist yet; its closest
/// existing ancestor decides the drive.
pub fn available_bytes(path: &Path) -> Result<(PathBuf, u64), DownloadError> {
    let probe = closest_existing_ancestor(path)?;
    let probe = probe.canonicalize()?;

    let disks = Disks::new_with_refreshed_list();
    let best = disks
        .iter()
        .filter(|disk| probe.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    match best {
        Some(disk) => Ok((disk.mount_point().to_path_buf(), disk.available_space())),
        None => Err(DownloadError::Io(std::sync::Arc::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no mounted drive contains {}", probe.display()),
        )))),
    }
}

fn closest_existing_ancestor(path: &Path) -> Result<PathBuf, DownloadError> {
    let mut current = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    loop {
        if current.exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(DownloadError::Io(std::sync::Arc::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no existing ancestor for {}", path.display()),
            ))));
        }
    }
}
