//! Bundler: lay out the artifact contents in `<out>/stage`.
//!
//! The server's files go to the stage root and every installed package is
//! vendored under the configured library directory, so the artifact carries
//! everything the entry point imports.

use crate::{
    environment::Environment,
    error::Error,
    fsutil::{self, CopyStats},
    lockfile::Lockfile,
    manifest::ProjectManifest,
};
use glob::Pattern;
use std::path::{Path, PathBuf};

/// Paths never shipped in an artifact.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/__pycache__",
    "**/__pycache__/**",
    "**/*.pyc",
    "**/.DS_Store",
    "**/.git",
    "**/.git/**",
];

/// Result of a bundle step.
#[derive(Debug, Clone)]
pub struct Staged {
    pub root: PathBuf,
    pub stats: CopyStats,
}

/// Compiled exclude patterns.
#[derive(Debug, Clone)]
pub struct Excludes(Vec<Pattern>);

impl Excludes {
    pub fn new(extra: &[String]) -> Result<Self, Error> {
        let patterns = DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(patterns))
    }

    /// Whether a `/`-separated path, relative to the artifact root, is
    /// excluded.
    ///
    /// Paths are matched with a leading `/` so `**/` patterns also cover
    /// top-level entries.
    pub fn matches(&self, rel: &str) -> bool {
        let rooted = format!("/{rel}");
        self.0
            .iter()
            .any(|p| p.matches(rel) || p.matches(&rooted))
    }
}

/// Stage the built environment into `<out>/stage`.
pub fn bundle(
    manifest: &ProjectManifest,
    lock: &Lockfile,
    env: &Environment,
    out: &Path,
) -> Result<Staged, Error> {
    let excludes = Excludes::new(&manifest.bundle.exclude)?;
    let root = out.join("stage");
    fsutil::recreate_dir(&root)?;

    let mut stats = fsutil::copy_tree(&env.server_dir(), &root, |rel| excludes.matches(rel))?;

    let lib_rel = fsutil::relative(Path::new(""), &manifest.bundle.lib_dir);
    let lib_dir = root.join(&manifest.bundle.lib_dir);
    std::fs::create_dir_all(&lib_dir).map_err(Error::io_at(&lib_dir))?;
    for pkg in &lock.packages {
        let src = env.lib_dir().join(&pkg.name);
        if !src.is_dir() {
            return Err(Error::NotInstalled(pkg.name.clone()));
        }
        let prefix = if lib_rel.is_empty() {
            pkg.name.clone()
        } else {
            format!("{lib_rel}/{}", pkg.name)
        };
        stats += fsutil::copy_tree(&src, &lib_dir.join(&pkg.name), |rel| {
            excludes.matches(&format!("{prefix}/{rel}"))
        })?;
    }

    tracing::info!(
        files = stats.files,
        bytes = stats.bytes,
        "staged bundle at {}",
        root.display()
    );
    Ok(Staged { root, stats })
}
