#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the snapshot data directory.

use std::path::{Path, PathBuf};

/// File name of the durable incident snapshot.
pub const CACHE_FILE_NAME: &str = "crime-data-cache.json";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`; falls back to the
/// current directory when the manifest path has fewer ancestors than
/// expected (e.g. a relocated binary).
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the default path of the durable incident snapshot.
#[must_use]
pub fn default_cache_path() -> PathBuf {
    data_dir().join(CACHE_FILE_NAME)
}

/// Returns the sibling temp path used while writing `path`.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_lives_in_data_dir() {
        let path = default_cache_path();
        assert!(path.ends_with("data/crime-data-cache.json"));
    }

    #[test]
    fn temp_path_is_a_sibling() {
        let path = Path::new("/var/cache/crime-data-cache.json");
        assert_eq!(
            temp_path(path),
            Path::new("/var/cache/crime-data-cache.json.tmp")
        );
    }
}
