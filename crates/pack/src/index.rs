//! Local package index.
//!
//! Layout: `<root>/<name>/<version>/`, one directory per published version.
//! A version directory holds the package's files and an optional
//! `package.toml` declaring its own `[dependencies]`.

use crate::error::Error;
use semver::Version;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Per-version metadata file inside the index.
pub const PACKAGE_FILE: &str = "package.toml";

#[derive(Debug, Default, Deserialize)]
struct PackageMeta {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

/// A directory of installable package versions.
#[derive(Debug, Clone)]
pub struct PackageIndex {
    root: PathBuf,
}

impl PackageIndex {
    /// Open an index rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::IoAt {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "package index directory not found",
                ),
                path: root,
            });
        }
        Ok(Self { root })
    }

    /// All published versions of `name`, newest first.
    pub fn versions(&self, name: &str) -> Result<Vec<Version>, Error> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(Error::UnknownPackage(name.to_string()));
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(Error::io_at(&dir))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let raw = entry.file_name().to_string_lossy().into_owned();
            match Version::parse(&raw) {
                Ok(v) => versions.push(v),
                Err(e) => tracing::warn!(package = name, dir = %raw, "skipping version: {e}"),
            }
        }
        versions.sort_unstable_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    /// Directory holding the files of one package version.
    pub fn package_dir(&self, name: &str, version: &Version) -> PathBuf {
        self.root.join(name).join(version.to_string())
    }

    /// Requirements declared by one package version.
    pub fn dependencies(
        &self,
        name: &str,
        version: &Version,
    ) -> Result<BTreeMap<String, String>, Error> {
        let path = self.package_dir(name, version).join(PACKAGE_FILE);
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::io_at(&path))?;
        let meta: PackageMeta =
            toml::from_str(&raw).map_err(|source| Error::Toml { path, source })?;
        Ok(meta.dependencies)
    }

    /// Content checksum of one package version.
    pub fn checksum(&self, name: &str, version: &Version) -> Result<String, Error> {
        checksum_dir(&self.package_dir(name, version))
    }
}

/// SHA-256 over every file below `dir`, in sorted relative-path order.
///
/// Each file contributes its `/`-separated relative path, a NUL byte and its
/// contents, so renames change the digest as well as edits.
pub fn checksum_dir(dir: &Path) -> Result<String, Error> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let contents = std::fs::read(entry.path()).map_err(Error::io_at(entry.path()))?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(&contents);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
