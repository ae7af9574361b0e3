// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency resolution.

Marking a package walks its `Pre-Depends`, `Depends` and `Recommends` depth first.
For each expression the alternatives are tried left to right against the status
table; the first one present with an acceptable version satisfies it. When none
does, the newest catalog version of the first alternative is marked as a
dependency. There is no backtracking and no conflict detection: a version chosen
for one branch may violate a constraint elsewhere in the graph.

A marked package is in the status table before its dependencies are walked, and a
candidate already pending at the same version is never marked again, so recursion
terminates on cycles, including cycles whose constraints cannot be met.

Marking is all or nothing: dependencies are resolved against a copy of the table
which replaces it only on success.
*/

use {
    crate::{
        catalog::Catalog,
        dependency::{DependencyAlternatives, DependencyOption},
        error::{OfflineAptError, Result},
        package_record::{PackageRecord, PackageStatus},
        package_version::PackageVersion,
        status::StatusTable,
    },
    log::{debug, info, warn},
    std::{
        ops::{Deref, DerefMut},
        sync::Arc,
    },
};

/// Marks packages and their dependencies in a [StatusTable].
///
/// `S` is a shared or exclusive reference to the table. Queries work with
/// either; marking needs an exclusive one.
pub struct Resolver<'a, S> {
    catalog: &'a Catalog,
    status: S,
}

impl<'a, S: Deref<Target = StatusTable>> Resolver<'a, S> {
    pub fn new(catalog: &'a Catalog, status: S) -> Self {
        Self { catalog, status }
    }

    /// Whether a package is installed on the target system.
    pub fn is_installed(&self, name: &str) -> bool {
        self.status.status_of(name) == Some(PackageStatus::Installed)
    }

    /// Whether a package is installed and older than the newest available version.
    pub fn is_upgradable(&self, name: &str) -> Result<bool> {
        if !self.is_installed(name) {
            return Ok(false);
        }

        let installed = match self.status.get(name) {
            Some(record) => record.parsed_version()?,
            None => return Ok(false),
        };

        Ok(match self.catalog.latest(name)? {
            Some(latest) => latest.parsed_version()? > installed,
            None => false,
        })
    }

    /// The newest available record of every installed package that has one newer
    /// than what is installed.
    ///
    /// Packages with unparsable versions are logged and skipped.
    pub fn upgrades(&self) -> Vec<Arc<PackageRecord>> {
        let mut upgrades: Vec<Arc<PackageRecord>> = vec![];

        for record in self.status.records() {
            if record.status() != Some(PackageStatus::Installed) {
                continue;
            }

            match self.newer_than(record) {
                Ok(Some(latest)) => {
                    if !upgrades.iter().any(|u| Arc::ptr_eq(u, &latest)) {
                        upgrades.push(latest);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("unable to check {} for upgrades: {}", record.package(), e);
                }
            }
        }

        upgrades
    }

    fn newer_than(&self, record: &PackageRecord) -> Result<Option<Arc<PackageRecord>>> {
        let installed = record.parsed_version()?;

        Ok(match self.catalog.latest(record.package())? {
            Some(latest) if latest.parsed_version()? > installed => Some(latest),
            _ => None,
        })
    }

    /// Whether the status table holds this exact record pending download or install.
    fn is_pending(&self, candidate: &PackageRecord) -> bool {
        match self.status.get(candidate.package()) {
            Some(present) => {
                present.package() == candidate.package()
                    && present.version_str() == candidate.version_str()
                    && present
                        .status()
                        .map(|s| s.is_pending_download() || s.is_pending_install())
                        .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Whether an alternative is satisfied by the status table.
    pub fn is_satisfied(&self, option: &DependencyOption) -> Result<bool> {
        let record = match self.status.get(&option.name) {
            Some(record) => record,
            None => return Ok(false),
        };

        if option.constraint.is_none() {
            return Ok(true);
        }

        let version = record
            .version_str()
            .map(PackageVersion::parse)
            .transpose()?;

        Ok(option.accepts(version.as_ref()))
    }
}

impl<'a, S: DerefMut<Target = StatusTable>> Resolver<'a, S> {
    /// Mark a package for download, recursively marking unsatisfied dependencies.
    ///
    /// Fails with [OfflineAptError::AlreadySatisfied] without changing anything if
    /// the package is installed and up to date. Returns the names marked, the
    /// package itself first.
    ///
    /// On error the status table is left unchanged.
    pub fn mark(&mut self, record: &PackageRecord, as_dependency: bool) -> Result<Vec<String>> {
        let mut staged = StatusTable::clone(&self.status);

        let names = Resolver::new(self.catalog, &mut staged).mark_staged(record, as_dependency)?;
        *self.status = staged;

        Ok(names)
    }

    fn mark_staged(&mut self, record: &PackageRecord, as_dependency: bool) -> Result<Vec<String>> {
        let name = record.package().to_string();

        if self.is_installed(&name) && !self.is_upgradable(&name)? {
            return Err(OfflineAptError::AlreadySatisfied(
                name,
                PackageStatus::Installed.to_string(),
            ));
        }

        let mut marked = record.clone();
        marked.set_status(PackageStatus::marked(as_dependency));
        self.status.insert(marked);

        let mut names = vec![name];

        info!("Finding dependencies for {}...", record.package());

        for expression in record.dependency_expressions() {
            let alternatives = DependencyAlternatives::parse(expression)?;

            let mut satisfied = false;
            for option in alternatives.iter() {
                if self.is_satisfied(option)? {
                    satisfied = true;
                    break;
                }
            }

            if satisfied {
                continue;
            }

            let first = match alternatives.first() {
                Some(first) => first,
                None => continue,
            };

            let candidate = match self.catalog.latest(&first.name)? {
                Some(candidate) => candidate,
                None => {
                    debug!(
                        "no candidate for {} needed by {}",
                        first.name,
                        record.package()
                    );
                    continue;
                }
            };

            if self.is_pending(&candidate) {
                debug!(
                    "{} {} is already marked; not satisfying {}",
                    candidate.package(),
                    candidate.version_str().unwrap_or_default(),
                    expression
                );
                continue;
            }

            match self.mark_staged(&candidate, true) {
                Ok(dependencies) => names.extend(dependencies),
                Err(OfflineAptError::AlreadySatisfied(name, _)) => {
                    debug!(
                        "{} is installed but does not satisfy {}; leaving it",
                        name, expression
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(names)
    }
}
