//! The project's dependency manifest, `extension.toml`.
//!
//! Declares the extension's identity, how the host invokes the server, the
//! files that make up the server, and the packages it depends on.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

/// File name of the dependency manifest inside a project directory.
pub const MANIFEST_FILE: &str = "extension.toml";

/// Placeholder the host expands to the extension's install directory.
pub const DIRNAME_VAR: &str = "${__dirname}";

/// Parsed `extension.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectManifest {
    pub extension: Extension,
    pub server: Server,
    #[serde(default)]
    pub build: Option<Build>,
    #[serde(default)]
    pub bundle: Bundle,
    #[serde(default)]
    pub index: Index,
    /// Package name to semver requirement.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Extension identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Extension {
    pub name: String,
    pub display_name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub author: Author,
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Author {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A tool advertised in the extension manifest.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Runtime the host uses to launch the server.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Binary,
    Python,
    Node,
}

/// How the host launches the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Server {
    #[serde(rename = "type")]
    pub server_type: ServerType,
    /// Path of the entry point inside the artifact.
    pub entry_point: PathBuf,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Files that make up the server.
    #[serde(default)]
    pub include: Vec<Include>,
}

/// A set of server files.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Include {
    /// Project-relative glob; matches keep their relative path.
    Path(String),
    /// Glob whose matches are placed directly in `dest`.
    Mapped { src: String, dest: PathBuf },
}

impl Include {
    pub fn pattern(&self) -> &str {
        match self {
            Include::Path(p) => p,
            Include::Mapped { src, .. } => src,
        }
    }
}

/// Optional command run before the environment is assembled.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Build {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bundle {
    #[serde(default = "default_lib_dir")]
    pub lib_dir: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    pub max_artifact_bytes: Option<u64>,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            lib_dir: default_lib_dir(),
            exclude: Vec::new(),
            extension: default_extension(),
            max_artifact_bytes: None,
        }
    }
}

fn default_lib_dir() -> PathBuf {
    PathBuf::from("server/lib")
}

fn default_extension() -> String {
    "mcpb".into()
}

/// Location of the local package index.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Index {
    #[serde(default = "default_index")]
    pub path: PathBuf,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            path: default_index(),
        }
    }
}

fn default_index() -> PathBuf {
    PathBuf::from("index")
}

impl ProjectManifest {
    /// Load and validate `extension.toml` from a project directory.
    pub fn load(project: &Path) -> Result<Self, Error> {
        let path = project.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path).map_err(Error::io_at(&path))?;
        let manifest: Self =
            toml::from_str(&raw).map_err(|source| Error::Toml { path, source })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check identity and dependency requirements.
    pub fn validate(&self) -> Result<(), Error> {
        let name = &self.extension.name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidManifest(format!(
                "extension name `{name}` must match [a-z0-9-]+"
            )));
        }
        semver::Version::parse(&self.extension.version)?;
        if self.server.command.is_empty() {
            return Err(Error::InvalidManifest("server.command is empty".into()));
        }
        if self.build.as_ref().is_some_and(|b| b.command.is_empty()) {
            return Err(Error::InvalidManifest("build.command is empty".into()));
        }

        require_inside("server.entry_point", &self.server.entry_point)?;
        require_inside("bundle.lib_dir", &self.bundle.lib_dir)?;
        for inc in &self.server.include {
            match inc {
                Include::Path(pattern) => require_inside("server.include", Path::new(pattern))?,
                Include::Mapped { dest, .. } => require_inside("server.include dest", dest)?,
            }
        }

        for (name, req) in &self.dependencies {
            if !is_package_name(name) {
                return Err(Error::InvalidManifest(format!(
                    "dependency name `{name}` must match [A-Za-z0-9_.-]+"
                )));
            }
            semver::VersionReq::parse(req)?;
        }
        Ok(())
    }

    /// File name of the artifact, e.g. `ai-news-distiller-0.1.0.mcpb`.
    pub fn artifact_name(&self) -> String {
        format!(
            "{}-{}.{}",
            self.extension.name, self.extension.version, self.bundle.extension
        )
    }
}

/// Fail unless `path` is relative and stays below its base directory.
fn require_inside(field: &str, path: &Path) -> Result<(), Error> {
    let inside = path.as_os_str().is_empty()
        || path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if inside {
        Ok(())
    } else {
        Err(Error::InvalidManifest(format!(
            "{field} `{}` must be a relative path without `..`",
            path.display()
        )))
    }
}

/// Package names double as directory names under the library directory.
pub fn is_package_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
[extension]
name = "ai-news-distiller"
display_name = "AI News Distiller"
version = "0.1.0"
description = "Distill AI news from Gmail"
author = { name = "News Team" }
tools = [{ name = "get_emails", description = "Fetch emails" }]

[server]
type = "binary"
entry_point = "bin/distill-mcp"
command = "${__dirname}/bin/distill-mcp"
args = ["--debug"]
include = ["bin/*", { src = "assets/*.json", dest = "config" }]

[dependencies]
alpha = "^1.0"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let m: ProjectManifest = toml::from_str(SAMPLE).unwrap();
        m.validate().unwrap();
        assert_eq!(m.server.server_type, ServerType::Binary);
        assert_eq!(m.bundle.lib_dir, PathBuf::from("server/lib"));
        assert_eq!(m.index.path, PathBuf::from("index"));
        assert_eq!(m.artifact_name(), "ai-news-distiller-0.1.0.mcpb");
        assert_eq!(m.dependencies["alpha"], "^1.0");
        assert_eq!(m.server.include[0], Include::Path("bin/*".into()));
        assert_eq!(m.server.include[1].pattern(), "assets/*.json");
    }

    #[test]
    fn rejects_bad_name() {
        let mut m: ProjectManifest = toml::from_str(SAMPLE).unwrap();
        m.extension.name = "Bad Name".into();
        assert!(matches!(m.validate(), Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn rejects_bad_requirement() {
        let mut m: ProjectManifest = toml::from_str(SAMPLE).unwrap();
        m.dependencies.insert("beta".into(), "not a version".into());
        assert!(matches!(m.validate(), Err(Error::Semver(_))));
    }

    #[test]
    fn rejects_paths_leaving_the_artifact() {
        let base: ProjectManifest = toml::from_str(SAMPLE).unwrap();

        let mut m = base.clone();
        m.bundle.lib_dir = std::env::temp_dir().join("elsewhere");
        assert!(matches!(m.validate(), Err(Error::InvalidManifest(msg)) if msg.contains("lib_dir")));

        let mut m = base.clone();
        m.bundle.lib_dir = "server/../../lib".into();
        assert!(m.validate().is_err());

        let mut m = base.clone();
        m.server.entry_point = "../bin/distill-mcp".into();
        assert!(m.validate().is_err());

        let mut m = base.clone();
        m.server.include.push(Include::Path("../shared/*.py".into()));
        assert!(matches!(m.validate(), Err(Error::InvalidManifest(msg)) if msg.contains("server.include")));

        let mut m = base.clone();
        m.server.include.push(Include::Mapped {
            src: "assets/*.json".into(),
            dest: "../config".into(),
        });
        assert!(m.validate().is_err());

        let mut m = base.clone();
        m.server.include.push(Include::Mapped {
            src: "../../target/release/distill-mcp".into(),
            dest: "bin".into(),
        });
        m.validate().unwrap();
    }

    #[test]
    fn rejects_dependency_names_that_are_paths() {
        let mut m: ProjectManifest = toml::from_str(SAMPLE).unwrap();
        m.dependencies.insert("../evil".into(), "1".into());
        assert!(matches!(m.validate(), Err(Error::InvalidManifest(_))));

        assert!(is_package_name("ruamel.yaml"));
        assert!(is_package_name("typing_extensions"));
        assert!(!is_package_name(".."));
        assert!(!is_package_name("a/b"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProjectManifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::IoAt { .. }));
    }
}
