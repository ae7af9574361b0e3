// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pending change sets.

A change set is the set of status table entries waiting to be downloaded or
installed. Applying it downloads package archives and moves each successfully
downloaded entry from a "to be downloaded" status to the matching "to be
installed" status. Failed items keep their status and are reported; items that
succeeded stay applied.
*/

use {
    crate::{
        catalog::Catalog,
        error::{OfflineAptError, Result},
        io::verify_file,
        package_record::{PackageRecord, PackageStatus},
        progress::{CancellationToken, ProgressEvent},
        status::StatusTable,
        transport::{FetchOutcome, Fetcher},
    },
    log::{error, info, warn},
    std::{
        ops::{Deref, DerefMut},
        path::{Path, PathBuf},
        sync::Arc,
    },
};

const SIZE_SYMBOLS: &[&str] = &["", "k", "M", "G", "T", "P", "E", "Z", "Y"];

/// Format a byte count with magnitude prefixes.
///
/// `binary` selects steps of 1024 instead of 1000. Values that need no scaling
/// are printed as plain integers.
pub fn human_readable(bytes: u64, binary: bool) -> String {
    let step = if binary { 1024.0 } else { 1000.0 };
    let threshold = 999.0;

    let mut number = bytes as f64;
    let mut depth = 0;

    while number > threshold && depth < SIZE_SYMBOLS.len() - 1 {
        depth += 1;
        number /= step;
    }

    if depth == 0 {
        format!("{}", bytes)
    } else if number < 9.95 {
        format!("{:.1} {}", number, SIZE_SYMBOLS[depth])
    } else {
        format!("{:.0} {}", number, SIZE_SYMBOLS[depth])
    }
}

/// Size of the pending downloads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeSize {
    /// Number of archives counted.
    pub count: usize,
    /// Total size, human readable with binary prefixes.
    pub human: String,
    /// Total size in bytes.
    pub total_bytes: u64,
}

/// Outcome of applying a change set.
#[derive(Clone, Debug, Default)]
pub struct ApplyReport {
    /// Packages whose archives were transferred.
    pub downloaded: Vec<String>,
    /// Packages whose archives were already complete.
    pub hits: Vec<String>,
    /// Packages that failed, with the error message. Their status is unchanged.
    pub failed: Vec<(String, String)>,
    /// Whether the operation stopped early.
    pub cancelled: bool,
}

impl ApplyReport {
    /// Whether every pending download succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Path a package archive is downloaded to.
pub fn archive_path(directory: &Path, record: &PackageRecord) -> Result<PathBuf> {
    let basename = record
        .archive_basename()
        .ok_or(OfflineAptError::RecordRequiredFieldMissing("Filename"))?;

    Ok(directory.join(basename))
}

fn download(
    fetcher: &dyn Fetcher,
    directory: &Path,
    name: &str,
    record: &PackageRecord,
    progress: &mut dyn FnMut(ProgressEvent),
) -> Result<FetchOutcome> {
    let repository = record
        .repository()
        .ok_or_else(|| OfflineAptError::MissingRepository(name.to_string()))?;
    let filename = record
        .filename()
        .ok_or(OfflineAptError::RecordRequiredFieldMissing("Filename"))?;

    let url = repository.archive_url(filename);
    let destination = archive_path(directory, record)?;

    let outcome = fetcher.fetch(&url, &destination, name, &mut |p| {
        progress(ProgressEvent::PackageDownload {
            name: p.label.to_string(),
            downloaded: p.downloaded,
            total: p.total,
        })
    })?;

    let size = record.size().transpose()?;
    let digest = record.content_digest().transpose()?;

    if let Err(e) = verify_file(&destination, size, digest.as_ref()) {
        if let Err(remove) = std::fs::remove_file(&destination) {
            warn!("unable to delete {}: {}", destination.display(), remove);
        }
        return Err(e);
    }

    Ok(outcome)
}

/// Operations over the pending entries of a [StatusTable].
///
/// `S` is a shared or exclusive reference to the table. Applying and cancelling
/// need an exclusive one.
pub struct ChangeSet<'a, S> {
    catalog: &'a Catalog,
    status: S,
}

impl<'a, S: Deref<Target = StatusTable>> ChangeSet<'a, S> {
    pub fn new(catalog: &'a Catalog, status: S) -> Self {
        Self { catalog, status }
    }

    fn resolve_where(
        &self,
        predicate: impl Fn(PackageStatus) -> bool,
    ) -> Vec<(String, Arc<PackageRecord>)> {
        self.status
            .records()
            .filter(|record| record.status().map(&predicate).unwrap_or(false))
            .filter_map(|record| {
                let version = record.version_str().unwrap_or("");

                match self.catalog.exact_str(record.package(), version) {
                    Some(available) => Some((record.package().to_string(), available)),
                    None => {
                        warn!(
                            "{} {} is not in any package list",
                            record.package(),
                            version
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Entries waiting to be downloaded, resolved to their catalog records.
    ///
    /// Entries whose exact version is not in the catalog are left out.
    pub fn pending_downloads(&self) -> Vec<(String, Arc<PackageRecord>)> {
        self.resolve_where(|s| s.is_pending_download())
    }

    /// Entries downloaded and waiting to be installed, resolved to their catalog records.
    pub fn pending_installs(&self) -> Vec<(String, Arc<PackageRecord>)> {
        self.resolve_where(|s| s.is_pending_install())
    }

    /// The status of a name in the underlying status table.
    pub fn status_of(&self, name: &str) -> Option<PackageStatus> {
        self.status.status_of(name)
    }

    /// Whether anything is waiting to be installed.
    pub fn has_pending_installs(&self) -> bool {
        self.status
            .records()
            .any(|r| r.status().map(|s| s.is_pending_install()).unwrap_or(false))
    }

    /// Number and total size of the pending downloads.
    ///
    /// Records without a valid `Size` are left out of both.
    pub fn change_size(&self) -> ChangeSize {
        let mut count = 0;
        let mut total_bytes = 0;

        for (name, record) in self.pending_downloads() {
            match record.size() {
                Some(Ok(size)) => {
                    count += 1;
                    total_bytes += size;
                }
                Some(Err(e)) => {
                    warn!("{} has an invalid Size: {}", name, e);
                }
                None => {
                    warn!("{} has no Size", name);
                }
            }
        }

        ChangeSize {
            count,
            human: human_readable(total_bytes, true),
            total_bytes,
        }
    }
}

impl<'a, S: DerefMut<Target = StatusTable>> ChangeSet<'a, S> {
    /// Download every pending archive into a directory.
    ///
    /// Each successful download moves its entry to the matching install status.
    /// Failures are logged and reported and don't stop the remaining downloads.
    pub fn apply(
        &mut self,
        fetcher: &dyn Fetcher,
        directory: &Path,
        progress: &mut dyn FnMut(ProgressEvent),
        cancel: &CancellationToken,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let downloads = self.pending_downloads();

        info!("{} packages to be downloaded", downloads.len());

        for (name, record) in downloads {
            if cancel.is_cancelled() {
                warn!("package download cancelled");
                report.cancelled = true;
                break;
            }

            match download(fetcher, directory, &name, &record, progress) {
                Ok(outcome) => {
                    if let Some(next) = self.status.status_of(&name).and_then(|s| s.after_download())
                    {
                        self.status.set_status(&name, next);
                    }

                    if outcome.is_hit() {
                        progress(ProgressEvent::PackageHit { name: name.clone() });
                        report.hits.push(name);
                    } else {
                        report.downloaded.push(name);
                    }
                }
                Err(e) => {
                    error!("unable to download {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        progress(ProgressEvent::Finished);

        report
    }

    /// Drop pending entries.
    ///
    /// `downloads` selects entries waiting to be downloaded, `installs` those
    /// waiting to be installed. Returns the number of records removed.
    pub fn cancel(&mut self, downloads: bool, installs: bool) -> usize {
        self.status.retain(|record| match record.status() {
            Some(status) => {
                !((downloads && status.is_pending_download())
                    || (installs && status.is_pending_install()))
            }
            None => true,
        })
    }
}
