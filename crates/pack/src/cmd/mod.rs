//! Command-line interface for packaging an extension.

use crate::{
    error::Error,
    host,
    pipeline::{LockMode, Pipeline},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Resolve, bundle and package an MCP server into a host extension.
#[derive(Parser, Debug)]
#[command(name = "distill-pack", version, about)]
pub struct App {
    /// Project directory containing `extension.toml`.
    #[arg(long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Output directory (defaults to `<project>/dist`).
    #[arg(long, global = true)]
    pub out: Option<PathBuf>,

    /// Log every step in detail.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve dependencies into `extension.lock`.
    Lock {
        /// Fail instead of writing when the lock is missing or stale.
        #[arg(long, conflicts_with = "update")]
        locked: bool,
        /// Re-resolve even when the lock is fresh.
        #[arg(long)]
        update: bool,
    },
    /// Install locked packages and server files into an isolated environment.
    Build,
    /// Vendor the environment's libraries next to the server.
    Bundle,
    /// Write the extension manifest and archive the bundle.
    Package {
        /// Replace an existing artifact.
        #[arg(long)]
        force: bool,
    },
    /// Run lock, build, bundle and package in order.
    All {
        /// Fail instead of writing when the lock is missing or stale.
        #[arg(long)]
        locked: bool,
        /// Replace an existing artifact.
        #[arg(long)]
        force: bool,
    },
    /// Print or merge the host configuration entry for an unpacked install.
    HostConfig {
        /// Directory the artifact was unpacked into.
        #[arg(long)]
        install_dir: PathBuf,
        /// Host config file to update; prints the entry when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the command line that opens the inspector on the server.
    InspectCmd {
        /// Directory the artifact was unpacked into.
        #[arg(long)]
        install_dir: PathBuf,
        /// Disable the inspector's session token.
        #[arg(long)]
        omit_auth: bool,
    },
}

impl App {
    /// Parse CLI arguments and execute the corresponding command.
    pub fn run() -> Result<(), Error> {
        let app = App::parse();
        let filter = if app.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        };
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();

        let pipeline = Pipeline::open(&app.project, app.out)?;
        match app.command {
            Command::Lock { locked, update } => {
                let mode = match (locked, update) {
                    (true, _) => LockMode::Locked,
                    (_, true) => LockMode::Update,
                    _ => LockMode::Reuse,
                };
                let lock = pipeline.lock(mode)?;
                for pkg in &lock.packages {
                    println!("{} {}", pkg.name, pkg.version);
                }
            }
            Command::Build => {
                let env = pipeline.build()?;
                println!("{}", env.root.display());
            }
            Command::Bundle => {
                let staged = pipeline.bundle()?;
                println!("{}", staged.root.display());
            }
            Command::Package { force } => {
                let artifact = pipeline.package(force)?;
                println!("{}", artifact.path.display());
            }
            Command::All { locked, force } => {
                let mode = if locked {
                    LockMode::Locked
                } else {
                    LockMode::Reuse
                };
                let artifact = pipeline.run(mode, force)?;
                println!("{}", artifact.path.display());
            }
            Command::HostConfig {
                install_dir,
                config,
            } => {
                let entry = host::entry(&pipeline.manifest, &install_dir);
                match config {
                    Some(path) => host::merge(&path, &pipeline.manifest.extension.name, &entry)?,
                    None => {
                        let snippet = serde_json::json!({
                            "mcpServers": { pipeline.manifest.extension.name.clone(): entry }
                        });
                        println!("{}", serde_json::to_string_pretty(&snippet)?);
                    }
                }
            }
            Command::InspectCmd {
                install_dir,
                omit_auth,
            } => {
                let entry = host::entry(&pipeline.manifest, &install_dir);
                println!("{}", host::inspector_command(&entry, omit_auth));
            }
        }
        Ok(())
    }
}
