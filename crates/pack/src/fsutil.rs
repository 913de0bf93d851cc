//! Directory copying shared by the builder and bundler.

use crate::error::Error;
use std::path::Path;
use walkdir::WalkDir;

/// Totals from a copy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub bytes: u64,
}

impl std::ops::AddAssign for CopyStats {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.bytes += rhs.bytes;
    }
}

/// Copy every file below `src` into `dst`, keeping relative paths.
///
/// `skip` receives the `/`-separated path relative to `src`; returning true
/// drops the entry (and, for directories, everything below it).
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    skip: impl Fn(&str) -> bool,
) -> Result<CopyStats, Error> {
    let mut stats = CopyStats::default();
    let walker = WalkDir::new(src)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skip(&relative(src, e.path())));
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(Error::io_at(&target))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(Error::io_at(parent))?;
            }
            stats.bytes += std::fs::copy(entry.path(), &target).map_err(Error::io_at(entry.path()))?;
            stats.files += 1;
        }
    }
    Ok(stats)
}

/// Remove `dir` if present and create it empty.
pub fn recreate_dir(dir: &Path) -> Result<(), Error> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(Error::io_at(dir))?;
    }
    std::fs::create_dir_all(dir).map_err(Error::io_at(dir))
}

/// `/`-separated form of `path` relative to `base`.
pub fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
