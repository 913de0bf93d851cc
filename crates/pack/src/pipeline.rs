//! The build pipeline: resolve, build, bundle, package.
//!
//! Each step reads what the previous one left in the output directory, so
//! steps can also be run one at a time from the command line.

use crate::{
    bundle::{self, Staged},
    environment::{self, Environment},
    error::Error,
    index::PackageIndex,
    lockfile::{LOCK_FILE, Lockfile},
    manifest::ProjectManifest,
    package::{self, Artifact},
    resolve,
};
use std::path::{Path, PathBuf};

/// How `lock` treats an existing lockfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Reuse a fresh lock, re-resolve a stale or missing one.
    #[default]
    Reuse,
    /// Require a fresh lock; never write.
    Locked,
    /// Always re-resolve.
    Update,
}

/// A project and its output directory.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub project: PathBuf,
    pub out: PathBuf,
    pub manifest: ProjectManifest,
}

impl Pipeline {
    /// Load the project's manifest. `out` defaults to `<project>/dist`.
    pub fn open(project: impl Into<PathBuf>, out: Option<PathBuf>) -> Result<Self, Error> {
        let project = project.into();
        let manifest = ProjectManifest::load(&project)?;
        let out = out.unwrap_or_else(|| project.join("dist"));
        Ok(Self {
            project,
            out,
            manifest,
        })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.project.join(LOCK_FILE)
    }

    /// Produce the locked requirements list.
    pub fn lock(&self, mode: LockMode) -> Result<Lockfile, Error> {
        let path = self.lock_path();
        let deps = &self.manifest.dependencies;
        match mode {
            LockMode::Locked => {
                let lock = Lockfile::load(&path)?;
                if !lock.is_fresh(deps) {
                    return Err(Error::StaleLock);
                }
                return Ok(lock);
            }
            LockMode::Reuse if path.is_file() => {
                let lock = Lockfile::load(&path)?;
                if lock.is_fresh(deps) {
                    tracing::info!("using existing {}", path.display());
                    return Ok(lock);
                }
                tracing::info!("{} is stale, resolving again", path.display());
            }
            LockMode::Reuse | LockMode::Update => {}
        }

        let lock = if deps.is_empty() {
            Lockfile::new(deps, Vec::new())
        } else {
            let index = PackageIndex::open(self.project.join(&self.manifest.index.path))?;
            resolve::resolve(deps, &index)?
        };
        lock.write(&path)?;
        tracing::info!(packages = lock.packages.len(), "wrote {}", path.display());
        Ok(lock)
    }

    /// Build the isolated environment from the current lock.
    pub fn build(&self) -> Result<Environment, Error> {
        let lock = Lockfile::load(&self.lock_path())?;
        environment::build(&self.project, &self.manifest, &lock, &self.out)
    }

    /// Stage the built environment.
    pub fn bundle(&self) -> Result<Staged, Error> {
        let env = Environment::at(&self.out);
        require(&env.root, "build")?;
        let lock = Lockfile::load(&self.lock_path())?;
        bundle::bundle(&self.manifest, &lock, &env, &self.out)
    }

    /// Archive the staged bundle.
    pub fn package(&self, force: bool) -> Result<Artifact, Error> {
        let root = self.out.join("stage");
        require(&root, "bundle")?;
        let lock = Lockfile::load(&self.lock_path())?;
        let staged = Staged {
            root,
            stats: Default::default(),
        };
        package::package(&self.manifest, &lock, &staged, &self.out, force)
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run(&self, mode: LockMode, force: bool) -> Result<Artifact, Error> {
        tracing::info!(
            "packaging {} {}",
            self.manifest.extension.name,
            self.manifest.extension.version
        );
        let lock = self.lock(mode)?;
        let env = environment::build(&self.project, &self.manifest, &lock, &self.out)?;
        let staged = bundle::bundle(&self.manifest, &lock, &env, &self.out)?;
        package::package(&self.manifest, &lock, &staged, &self.out, force)
    }
}

fn require(path: &Path, step: &'static str) -> Result<(), Error> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(Error::NotBuilt {
            path: path.to_path_buf(),
            step,
        })
    }
}
