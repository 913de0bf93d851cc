//! Packager: write `manifest.json` and archive the stage.
//!
//! Archives are reproducible: entries are added in sorted order with a fixed
//! timestamp, so the same stage always yields the same bytes.

use crate::{
    bundle::Staged,
    error::Error,
    fsutil,
    lockfile::Lockfile,
    manifest::{Author, ProjectManifest, ServerType, ToolInfo},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

/// Name of the extension manifest at the artifact root.
pub const EXTENSION_MANIFEST: &str = "manifest.json";

/// Manifest format version understood by the host.
pub const MANIFEST_VERSION: &str = "0.2";

/// The manifest the host reads at install and launch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub manifest_version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub version: String,
    pub description: String,
    pub author: Author,
    pub server: ServerSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(rename = "type")]
    pub server_type: ServerType,
    pub entry_point: String,
    pub mcp_config: McpConfig,
}

/// Invocation the host uses to spawn the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ExtensionManifest {
    pub fn from_project(manifest: &ProjectManifest) -> Self {
        let ext = &manifest.extension;
        let server = &manifest.server;
        Self {
            manifest_version: MANIFEST_VERSION.into(),
            name: ext.name.clone(),
            display_name: ext.display_name.clone(),
            version: ext.version.clone(),
            description: ext.description.clone(),
            author: ext.author.clone(),
            server: ServerSection {
                server_type: server.server_type,
                entry_point: fsutil::relative(Path::new(""), &server.entry_point),
                mcp_config: McpConfig {
                    command: server.command.clone(),
                    args: server.args.clone(),
                    env: server.env.clone(),
                },
            },
            tools: ext.tools.clone(),
        }
    }
}

/// A finished artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
}

/// Archive `staged` into `<out>/<name>-<version>.<extension>`.
///
/// The archive is written to a temporary file next to the target and moved
/// into place only once it is complete and within the size limit, so a
/// failed run leaves any previous artifact untouched.
pub fn package(
    manifest: &ProjectManifest,
    lock: &Lockfile,
    staged: &Staged,
    out: &Path,
    force: bool,
) -> Result<Artifact, Error> {
    let path = out.join(manifest.artifact_name());
    if path.exists() && !force {
        return Err(Error::ArtifactExists(path));
    }
    check_stage(manifest, lock, &staged.root)?;

    let ext_manifest = ExtensionManifest::from_project(manifest);
    let manifest_path = staged.root.join(EXTENSION_MANIFEST);
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&ext_manifest)?)
        .map_err(Error::io_at(&manifest_path))?;

    std::fs::create_dir_all(out).map_err(Error::io_at(out))?;
    let mut tmp = NamedTempFile::new_in(out).map_err(Error::io_at(out))?;
    let entry_point = ext_manifest.server.entry_point.clone();
    write_archive(&staged.root, tmp.as_file_mut(), |rel| rel == entry_point)?;

    let size = tmp.as_file().metadata().map_err(Error::io_at(tmp.path()))?.len();
    if let Some(limit) = manifest.bundle.max_artifact_bytes {
        if size > limit {
            return Err(Error::ArtifactTooLarge { size, limit });
        }
    }
    tmp.persist(&path)
        .map_err(|e| Error::IoAt {
            path: path.clone(),
            source: e.error,
        })?;

    tracing::info!(size, "packaged {}", path.display());
    Ok(Artifact { path, size })
}

/// Fail when the stage lacks the entry point or a locked package.
fn check_stage(manifest: &ProjectManifest, lock: &Lockfile, root: &Path) -> Result<(), Error> {
    let entry = root.join(&manifest.server.entry_point);
    if !entry.is_file() {
        return Err(Error::MissingFromStage(manifest.server.entry_point.clone()));
    }
    for pkg in &lock.packages {
        let lib = manifest.bundle.lib_dir.join(&pkg.name);
        if !root.join(&lib).is_dir() {
            return Err(Error::MissingFromStage(lib));
        }
    }
    Ok(())
}

fn write_archive(
    root: &Path,
    file: &mut File,
    executable: impl Fn(&str) -> bool,
) -> Result<(), Error> {
    let mut zip = ZipWriter::new(file);
    let base = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let rel = fsutil::relative(root, entry.path());
        if entry.file_type().is_dir() {
            zip.add_directory(format!("{rel}/"), base.unix_permissions(0o755))?;
        } else if entry.file_type().is_file() {
            let mode = if executable(&rel) { 0o755 } else { 0o644 };
            zip.start_file(rel, base.unix_permissions(mode))?;
            let contents = std::fs::read(entry.path()).map_err(Error::io_at(entry.path()))?;
            zip.write_all(&contents)?;
        }
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bundle, environment, environment::tests::project, index::PackageIndex, resolve::resolve};
    use std::io::Read;

    fn stage_with(
        root: &Path,
        edit: impl FnOnce(&mut ProjectManifest),
    ) -> (ProjectManifest, Lockfile, Staged) {
        let mut manifest = project(root);
        edit(&mut manifest);
        let index = PackageIndex::open(root.join("index")).unwrap();
        let lock = resolve(&manifest.dependencies, &index).unwrap();
        let out = root.join("dist");
        let env = environment::build(root, &manifest, &lock, &out).unwrap();
        let staged = bundle::bundle(&manifest, &lock, &env, &out).unwrap();
        (manifest, lock, staged)
    }

    fn stage(root: &Path) -> (ProjectManifest, Lockfile, Staged) {
        stage_with(root, |_| {})
    }

    #[test]
    fn archive_holds_manifest_server_and_libs() {
        let tmp = tempfile::tempdir().unwrap();
        let (manifest, lock, staged) = stage(tmp.path());
        let out = tmp.path().join("dist");

        let artifact = package(&manifest, &lock, &staged, &out, false).unwrap();
        assert!(artifact.path.ends_with("ai-news-distiller-0.1.0.mcpb"));

        let mut archive = zip::ZipArchive::new(File::open(&artifact.path).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(String::from).collect();
        assert!(names.contains(&"bin/distill-mcp".to_string()));
        assert!(names.contains(&"server/lib/alpha/__init__.py".to_string()));
        assert!(names.contains(&"config/settings.json".to_string()));

        let mut raw = String::new();
        archive
            .by_name(EXTENSION_MANIFEST)
            .unwrap()
            .read_to_string(&mut raw)
            .unwrap();
        let parsed: ExtensionManifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.manifest_version, MANIFEST_VERSION);
        assert_eq!(parsed.server.entry_point, "bin/distill-mcp");
        assert_eq!(parsed.server.mcp_config.command, "${__dirname}/bin/distill-mcp");
        assert_eq!(parsed.server.mcp_config.args, ["--debug"]);
        assert_eq!(parsed.tools.len(), 1);

        let entry = archive.by_name("bin/distill-mcp").unwrap();
        assert_eq!(entry.unix_mode().map(|m| m & 0o777), Some(0o755));
    }

    #[test]
    fn refuses_to_overwrite_unless_forced() {
        let tmp = tempfile::tempdir().unwrap();
        let (manifest, lock, staged) = stage(tmp.path());
        let out = tmp.path().join("dist");
        let first = package(&manifest, &lock, &staged, &out, false).unwrap();

        let err = package(&manifest, &lock, &staged, &out, false).unwrap_err();
        assert!(matches!(err, Error::ArtifactExists(_)));

        let bytes = std::fs::read(&first.path).unwrap();
        let second = package(&manifest, &lock, &staged, &out, true).unwrap();
        assert_eq!(bytes, std::fs::read(&second.path).unwrap());
    }

    #[test]
    fn enforces_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut manifest, lock, staged) = stage(tmp.path());
        manifest.bundle.max_artifact_bytes = Some(16);
        let out = tmp.path().join("dist");

        let err = package(&manifest, &lock, &staged, &out, false).unwrap_err();
        assert!(matches!(err, Error::ArtifactTooLarge { limit: 16, .. }));
        assert!(!out.join(manifest.artifact_name()).exists());
    }

    #[test]
    fn failed_forced_run_keeps_previous_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut manifest, lock, staged) = stage(tmp.path());
        let out = tmp.path().join("dist");
        let first = package(&manifest, &lock, &staged, &out, false).unwrap();
        let bytes = std::fs::read(&first.path).unwrap();

        manifest.bundle.max_artifact_bytes = Some(16);
        let err = package(&manifest, &lock, &staged, &out, true).unwrap_err();
        assert!(matches!(err, Error::ArtifactTooLarge { .. }));
        assert_eq!(std::fs::read(&first.path).unwrap(), bytes);

        let leftovers: Vec<_> = std::fs::read_dir(&out)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn excluded_entry_point_fails_before_archiving() {
        let tmp = tempfile::tempdir().unwrap();
        let (manifest, lock, staged) =
            stage_with(tmp.path(), |m| m.bundle.exclude.push("bin/**".into()));
        let out = tmp.path().join("dist");

        let err = package(&manifest, &lock, &staged, &out, false).unwrap_err();
        assert!(matches!(err, Error::MissingFromStage(p) if p == Path::new("bin/distill-mcp")));
        assert!(!out.join(manifest.artifact_name()).exists());
    }

    #[test]
    fn missing_library_fails_before_archiving() {
        let tmp = tempfile::tempdir().unwrap();
        let (manifest, lock, staged) = stage(tmp.path());
        std::fs::remove_dir_all(staged.root.join("server").join("lib").join("alpha")).unwrap();
        let out = tmp.path().join("dist");

        let err = package(&manifest, &lock, &staged, &out, false).unwrap_err();
        assert!(matches!(err, Error::MissingFromStage(p) if p == Path::new("server/lib/alpha")));
        assert!(!out.join(manifest.artifact_name()).exists());
    }
}
