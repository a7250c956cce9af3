use std::path::PathBuf;

/// Normalizes a manifest-relative path to forward slashes with no leading
/// separator. Filters and cross-depot claims compare these strings directly.
pub fn normalize_slashes(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    replaced.trim_start_matches('/').to_string()
}

/// Converts a slash-normalized relative path into a native relative path.
pub fn to_native(path: &str) -> PathBuf {
    normalize_slashes(path).split('/').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backslashes_are_normalized() {
        assert_eq!(normalize_slashes("bin\\win64\\game.exe"), "bin/win64/game.exe");
        assert_eq!(normalize_slashes("/data/pak0.pak"), "data/pak0.pak");
    }

    #[test]
    fn native_path_has_components() {
        let native = to_native("a/b/c.txt");
        let parts: Vec<_> = native.components().collect();
        assert_eq!(parts.len(), 3);
    }
}
