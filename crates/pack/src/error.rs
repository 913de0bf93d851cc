use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("invalid version: {0}")]
    Semver(#[from] semver::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid host config: {0}")]
    HostConfig(String),

    #[error("package `{0}` not found in index")]
    UnknownPackage(String),

    #[error("no version of `{name}` satisfies {}", .requirements.join(", "))]
    Unsatisfiable {
        name: String,
        requirements: Vec<String>,
    },

    #[error("dependency resolution did not settle after {0} rounds")]
    NoConvergence(usize),

    #[error("extension.lock is out of date; run `distill-pack lock`")]
    StaleLock,

    #[error("extension.lock not found at {0}; run `distill-pack lock`")]
    MissingLock(PathBuf),

    #[error("checksum mismatch for {name} {version}: locked {expected}, found {actual}")]
    Checksum {
        name: String,
        version: String,
        expected: String,
        actual: String,
    },

    #[error("build command `{command}` failed ({status}): {stderr}")]
    BuildCommand {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("include pattern `{0}` matched no files")]
    EmptyInclude(String),

    #[error("entry point {0} missing from the server files")]
    MissingEntryPoint(PathBuf),

    #[error("package `{0}` is locked but was not installed; run `distill-pack build`")]
    NotInstalled(String),

    #[error("{path} not found; run `distill-pack {step}` first")]
    NotBuilt { path: PathBuf, step: &'static str },

    #[error("{0} missing from the staged bundle")]
    MissingFromStage(PathBuf),

    #[error("artifact {0} already exists")]
    ArtifactExists(PathBuf),

    #[error("artifact is {size} bytes, over the {limit} byte limit")]
    ArtifactTooLarge { size: u64, limit: u64 },
}

impl Error {
    pub(crate) fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::IoAt { path, source }
    }
}
