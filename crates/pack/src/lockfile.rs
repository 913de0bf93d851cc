//! The locked requirements list, `extension.lock`.

use crate::error::Error;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, path::Path};

/// File name of the lockfile inside a project directory.
pub const LOCK_FILE: &str = "extension.lock";

const LOCK_VERSION: u32 = 1;

/// Resolved, installable package set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub version: u32,
    /// Digest of the `[dependencies]` table this lock was resolved from.
    pub manifest_hash: String,
    #[serde(rename = "package", default)]
    pub packages: Vec<LockedPackage>,
}

/// One pinned package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: Version,
    pub checksum: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Lockfile {
    /// Create a lockfile; packages are sorted by name.
    pub fn new(dependencies: &BTreeMap<String, String>, mut packages: Vec<LockedPackage>) -> Self {
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        for p in &mut packages {
            p.dependencies.sort();
        }
        Self {
            version: LOCK_VERSION,
            manifest_hash: manifest_hash(dependencies),
            packages,
        }
    }

    /// Read `extension.lock`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::MissingLock(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(Error::io_at(path))?;
        toml::from_str(&raw).map_err(|source| Error::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write `extension.lock`.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let body = toml::to_string_pretty(self)?;
        let content = format!("# Generated by distill-pack. Do not edit.\n{body}");
        std::fs::write(path, content).map_err(Error::io_at(path))
    }

    /// Whether this lock was resolved from the given requirements.
    pub fn is_fresh(&self, dependencies: &BTreeMap<String, String>) -> bool {
        self.version == LOCK_VERSION && self.manifest_hash == manifest_hash(dependencies)
    }
}

/// Digest of a requirements table, independent of formatting.
pub fn manifest_hash(dependencies: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, req) in dependencies {
        hasher.update(name.trim().as_bytes());
        hasher.update(b"=");
        hasher.update(req.trim().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
