//! Dependency resolution against a [`PackageIndex`].
//!
//! Resolution is a fixpoint: requirements are gathered from the manifest and
//! from every currently selected package, then each package gets the highest
//! version satisfying all of its requirements. Rounds repeat until the
//! selection stops changing. Names are visited in sorted order, so the same
//! manifest and index always produce the same lockfile.
//!
//! When some package has no acceptable version, the package version that
//! imposed one of the conflicting requirements is ruled out and resolution
//! starts over, so an older release with looser dependencies gets a chance.

use crate::{
    error::Error,
    index::PackageIndex,
    lockfile::{LockedPackage, Lockfile},
};
use semver::{Version, VersionReq};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on rounds of a single fixpoint before giving up.
pub const MAX_ROUNDS: usize = 64;

/// Upper bound on ruled-out package versions before giving up.
pub const MAX_BACKTRACKS: usize = 256;

const ROOT: &str = "extension";

/// One requirement on a package and who imposed it.
#[derive(Debug, Clone)]
struct Requirement {
    req: VersionReq,
    raw: String,
    /// Package version that declared it; `None` for the manifest.
    from: Option<(String, Version)>,
}

impl Requirement {
    fn describe(&self) -> String {
        match &self.from {
            Some((name, version)) => format!("`{}` (from {name} {version})", self.raw),
            None => format!("`{}` (from {ROOT})", self.raw),
        }
    }
}

enum Outcome {
    Settled(BTreeMap<String, Version>),
    Conflict {
        error: Error,
        culprit: Option<(String, Version)>,
    },
}

/// Resolve `dependencies` into a lockfile.
///
/// If resolution fails even after backtracking, the first conflict found is
/// reported.
pub fn resolve(
    dependencies: &BTreeMap<String, String>,
    index: &PackageIndex,
) -> Result<Lockfile, Error> {
    let mut excluded: BTreeSet<(String, Version)> = BTreeSet::new();
    let mut first_conflict = None;

    for _ in 0..=MAX_BACKTRACKS {
        match settle(dependencies, index, &excluded)? {
            Outcome::Settled(selected) => return lock(dependencies, &selected, index),
            Outcome::Conflict { error, culprit } => {
                let Some(culprit) = culprit else {
                    return Err(first_conflict.unwrap_or(error));
                };
                tracing::debug!(package = %culprit.0, version = %culprit.1, "ruling out and retrying");
                first_conflict.get_or_insert(error);
                excluded.insert(culprit);
            }
        }
    }
    Err(first_conflict.unwrap_or(Error::NoConvergence(MAX_ROUNDS)))
}

/// Run the fixpoint with `excluded` versions off the table.
fn settle(
    dependencies: &BTreeMap<String, String>,
    index: &PackageIndex,
    excluded: &BTreeSet<(String, Version)>,
) -> Result<Outcome, Error> {
    let mut selected: BTreeMap<String, Version> = BTreeMap::new();

    for round in 0..MAX_ROUNDS {
        let requirements = collect(dependencies, &selected, index)?;
        let mut next = BTreeMap::new();
        for (name, reqs) in &requirements {
            match select(name, reqs, index, excluded)? {
                Some(version) => {
                    next.insert(name.clone(), version);
                }
                None => {
                    return Ok(Outcome::Conflict {
                        error: Error::Unsatisfiable {
                            name: name.clone(),
                            requirements: reqs.iter().map(Requirement::describe).collect(),
                        },
                        culprit: reqs.iter().find_map(|r| r.from.clone()),
                    });
                }
            }
        }
        if next == selected {
            tracing::debug!(rounds = round, packages = next.len(), "resolution settled");
            return Ok(Outcome::Settled(selected));
        }
        selected = next;
    }
    Err(Error::NoConvergence(MAX_ROUNDS))
}

/// Gather requirements from the root and each selected package.
fn collect(
    root: &BTreeMap<String, String>,
    selected: &BTreeMap<String, Version>,
    index: &PackageIndex,
) -> Result<BTreeMap<String, Vec<Requirement>>, Error> {
    let mut out: BTreeMap<String, Vec<Requirement>> = BTreeMap::new();
    let mut add = |name: &str, raw: &str, from: Option<(String, Version)>| -> Result<(), Error> {
        out.entry(name.to_string()).or_default().push(Requirement {
            req: VersionReq::parse(raw)?,
            raw: raw.to_string(),
            from,
        });
        Ok(())
    };

    for (name, raw) in root {
        add(name, raw, None)?;
    }
    for (parent, version) in selected {
        for (name, raw) in index.dependencies(parent, version)? {
            add(&name, &raw, Some((parent.clone(), version.clone())))?;
        }
    }
    Ok(out)
}

/// Highest published, not ruled-out version satisfying every requirement.
fn select(
    name: &str,
    reqs: &[Requirement],
    index: &PackageIndex,
    excluded: &BTreeSet<(String, Version)>,
) -> Result<Option<Version>, Error> {
    Ok(index.versions(name)?.into_iter().find(|v| {
        !excluded.contains(&(name.to_string(), v.clone()))
            && reqs.iter().all(|r| r.req.matches(v))
    }))
}

fn lock(
    dependencies: &BTreeMap<String, String>,
    selected: &BTreeMap<String, Version>,
    index: &PackageIndex,
) -> Result<Lockfile, Error> {
    let mut packages = Vec::with_capacity(selected.len());
    for (name, version) in selected {
        packages.push(LockedPackage {
            name: name.clone(),
            version: version.clone(),
            checksum: index.checksum(name, version)?,
            dependencies: index.dependencies(name, version)?.into_keys().collect(),
        });
    }
    Ok(Lockfile::new(dependencies, packages))
}
