//! Environment builder.
//!
//! Assembles an isolated environment under `<out>/env` holding the locked
//! packages (`lib/<name>/`) and the server's own files (`server/`). The
//! directory is recreated on every build so nothing leaks in from a previous
//! run.

use crate::{
    error::Error,
    fsutil::{self, CopyStats},
    index::{PACKAGE_FILE, PackageIndex},
    lockfile::Lockfile,
    manifest::{Include, ProjectManifest},
};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    process::Command,
};

/// Record of installed packages written into the environment.
pub const INSTALLED_FILE: &str = "installed.toml";

/// A built environment.
#[derive(Debug, Clone)]
pub struct Environment {
    pub root: PathBuf,
}

impl Environment {
    pub fn at(out: &Path) -> Self {
        Self {
            root: out.join("env"),
        }
    }

    /// Installed package libraries.
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    /// The server's own files.
    pub fn server_dir(&self) -> PathBuf {
        self.root.join("server")
    }
}

#[derive(Serialize)]
struct Installed<'a> {
    #[serde(rename = "package")]
    packages: Vec<InstalledPackage<'a>>,
}

#[derive(Serialize)]
struct InstalledPackage<'a> {
    name: &'a str,
    version: String,
}

/// Build the environment for `project` into `out`.
pub fn build(
    project: &Path,
    manifest: &ProjectManifest,
    lock: &Lockfile,
    out: &Path,
) -> Result<Environment, Error> {
    if !lock.is_fresh(&manifest.dependencies) {
        return Err(Error::StaleLock);
    }
    if let Some(build) = &manifest.build {
        run_build_command(project, &build.command)?;
    }

    let env = Environment::at(out);
    fsutil::recreate_dir(&env.root)?;

    let mut totals = CopyStats::default();
    if !lock.packages.is_empty() {
        totals += install_packages(project, manifest, lock, &env)?;
    }
    std::fs::create_dir_all(env.lib_dir()).map_err(Error::io_at(env.lib_dir()))?;

    totals += copy_includes(project, &manifest.server.include, &env.server_dir())?;
    let entry = env.server_dir().join(&manifest.server.entry_point);
    if !entry.is_file() {
        return Err(Error::MissingEntryPoint(manifest.server.entry_point.clone()));
    }

    let installed = Installed {
        packages: lock
            .packages
            .iter()
            .map(|p| InstalledPackage {
                name: &p.name,
                version: p.version.to_string(),
            })
            .collect(),
    };
    let record = env.root.join(INSTALLED_FILE);
    std::fs::write(&record, toml::to_string_pretty(&installed)?).map_err(Error::io_at(&record))?;

    tracing::info!(
        packages = lock.packages.len(),
        files = totals.files,
        bytes = totals.bytes,
        "environment built at {}",
        env.root.display()
    );
    Ok(env)
}

/// Verify each locked package against the index and copy it into `lib/`.
fn install_packages(
    project: &Path,
    manifest: &ProjectManifest,
    lock: &Lockfile,
    env: &Environment,
) -> Result<CopyStats, Error> {
    let index = PackageIndex::open(project.join(&manifest.index.path))?;
    let mut totals = CopyStats::default();
    for pkg in &lock.packages {
        let actual = index.checksum(&pkg.name, &pkg.version)?;
        if actual != pkg.checksum {
            return Err(Error::Checksum {
                name: pkg.name.clone(),
                version: pkg.version.to_string(),
                expected: pkg.checksum.clone(),
                actual,
            });
        }
        let src = index.package_dir(&pkg.name, &pkg.version);
        let stats = fsutil::copy_tree(&src, &env.lib_dir().join(&pkg.name), |rel| {
            rel == PACKAGE_FILE
        })?;
        tracing::debug!(package = %pkg.name, version = %pkg.version, files = stats.files, "installed");
        totals += stats;
    }
    Ok(totals)
}

fn run_build_command(project: &Path, command: &[String]) -> Result<(), Error> {
    let rendered = command.join(" ");
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::InvalidManifest("build.command is empty".into()))?;
    tracing::info!("running build command `{rendered}`");
    let output = Command::new(program)
        .args(args)
        .current_dir(project)
        .output()
        .map_err(Error::io_at(program))?;
    if !output.status.success() {
        return Err(Error::BuildCommand {
            command: rendered,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Copy the server's files into `dst`.
///
/// Plain patterns keep paths relative to the project; mapped patterns drop
/// each match into their `dest` directory by file name.
fn copy_includes(project: &Path, include: &[Include], dst: &Path) -> Result<CopyStats, Error> {
    std::fs::create_dir_all(dst).map_err(Error::io_at(dst))?;
    let mut totals = CopyStats::default();
    let base = PathBuf::from(glob::Pattern::escape(&project.to_string_lossy()));
    for inc in include {
        let full = base.join(inc.pattern());
        let mut matched = false;
        for path in glob::glob(&full.to_string_lossy())?.filter_map(|p| p.ok()) {
            matched = true;
            let target = match inc {
                Include::Path(_) => match path.strip_prefix(project) {
                    Ok(rel) => dst.join(rel),
                    Err(_) => dst.join(path.file_name().unwrap_or(path.as_os_str())),
                },
                Include::Mapped { dest, .. } => {
                    dst.join(dest).join(path.file_name().unwrap_or(path.as_os_str()))
                }
            };
            if path.is_dir() {
                totals += fsutil::copy_tree(&path, &target, |_| false)?;
            } else {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(Error::io_at(parent))?;
                }
                totals.bytes += std::fs::copy(&path, &target).map_err(Error::io_at(&path))?;
                totals.files += 1;
            }
        }
        if !matched {
            return Err(Error::EmptyInclude(inc.pattern().to_string()));
        }
    }
    Ok(totals)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{index::tests::publish, manifest::tests::SAMPLE, resolve::resolve};
    use std::fs;

    /// A project with one dependency and a binary entry point.
    pub(crate) fn project(root: &Path) -> ProjectManifest {
        publish(&root.join("index"), "alpha", "1.2.0", &[]);
        fs::create_dir_all(root.join("index").join("alpha").join("1.2.0").join("__pycache__"))
            .unwrap();
        fs::write(
            root.join("index")
                .join("alpha")
                .join("1.2.0")
                .join("__pycache__")
                .join("x.pyc"),
            "cache",
        )
        .unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin").join("distill-mcp"), "#!/bin/sh\n").unwrap();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("assets").join("settings.json"), "{}").unwrap();
        fs::write(root.join("extension.toml"), SAMPLE).unwrap();
        ProjectManifest::load(root).unwrap()
    }

    fn lock_for(root: &Path, manifest: &ProjectManifest) -> Lockfile {
        let index = PackageIndex::open(root.join("index")).unwrap();
        resolve(&manifest.dependencies, &index).unwrap()
    }

    #[test]
    fn installs_locked_packages_and_server_files() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = project(tmp.path());
        let lock = lock_for(tmp.path(), &manifest);
        let out = tmp.path().join("dist");

        let env = build(tmp.path(), &manifest, &lock, &out).unwrap();
        assert!(env.lib_dir().join("alpha").join("__init__.py").is_file());
        assert!(env.server_dir().join("bin").join("distill-mcp").is_file());
        assert!(env.server_dir().join("config").join("settings.json").is_file());
        let record = fs::read_to_string(env.root.join(INSTALLED_FILE)).unwrap();
        assert!(record.contains("alpha"));
    }

    #[test]
    fn rebuild_drops_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = project(tmp.path());
        let lock = lock_for(tmp.path(), &manifest);
        let out = tmp.path().join("dist");
        let env = build(tmp.path(), &manifest, &lock, &out).unwrap();
        fs::write(env.root.join("leftover"), "x").unwrap();

        let env = build(tmp.path(), &manifest, &lock, &out).unwrap();
        assert!(!env.root.join("leftover").exists());
    }

    #[test]
    fn rejects_tampered_package() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = project(tmp.path());
        let lock = lock_for(tmp.path(), &manifest);
        fs::write(
            tmp.path().join("index").join("alpha").join("1.2.0").join("__init__.py"),
            "tampered",
        )
        .unwrap();

        let err = build(tmp.path(), &manifest, &lock, &tmp.path().join("dist")).unwrap_err();
        assert!(matches!(err, Error::Checksum { .. }));
    }

    #[test]
    fn rejects_stale_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = project(tmp.path());
        let lock = lock_for(tmp.path(), &manifest);
        manifest.dependencies.insert("beta".into(), "1".into());

        let err = build(tmp.path(), &manifest, &lock, &tmp.path().join("dist")).unwrap_err();
        assert!(matches!(err, Error::StaleLock));
    }

    #[test]
    fn include_must_match() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = project(tmp.path());
        let lock = lock_for(tmp.path(), &manifest);
        manifest.server.include.push(Include::Path("docs/*.md".into()));

        let err = build(tmp.path(), &manifest, &lock, &tmp.path().join("dist")).unwrap_err();
        assert!(matches!(err, Error::EmptyInclude(p) if p == "docs/*.md"));
    }

    #[test]
    fn project_path_with_glob_characters() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("proj[1]");
        fs::create_dir_all(&root).unwrap();
        let manifest = project(&root);
        let lock = lock_for(&root, &manifest);

        let env = build(&root, &manifest, &lock, &root.join("dist")).unwrap();
        assert!(env.server_dir().join("bin").join("distill-mcp").is_file());
        assert!(env.server_dir().join("config").join("settings.json").is_file());
    }

    #[test]
    fn entry_point_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = project(tmp.path());
        let lock = lock_for(tmp.path(), &manifest);
        manifest.server.entry_point = "bin/other".into();

        let err = build(tmp.path(), &manifest, &lock, &tmp.path().join("dist")).unwrap_err();
        assert!(matches!(err, Error::MissingEntryPoint(_)));
    }

    #[cfg(unix)]
    #[test]
    fn failing_build_command_stops_the_build() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = project(tmp.path());
        let lock = lock_for(tmp.path(), &manifest);
        manifest.build = Some(crate::manifest::Build {
            command: vec!["sh".into(), "-c".into(), "echo broken >&2; exit 3".into()],
        });

        let err = build(tmp.path(), &manifest, &lock, &tmp.path().join("dist")).unwrap_err();
        match err {
            Error::BuildCommand { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
