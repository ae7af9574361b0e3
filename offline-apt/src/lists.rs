// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Downloading and reading cached `Packages` index lists. */

use {
    crate::{
        catalog::Catalog,
        io::{read_decompressed, Compression},
        progress::{CancellationToken, ProgressEvent},
        sources::{url_to_filename, Architecture, RepositoryEntry},
        transport::{FetchOutcome, Fetcher},
    },
    log::{error, info, warn},
    std::{
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// Compression of the index lists that are fetched.
pub const LIST_COMPRESSION: Compression = Compression::Gzip;

/// An index list of one repository section for one architecture.
#[derive(Clone, Debug)]
pub struct IndexList {
    pub repository: Arc<RepositoryEntry>,
    pub url: String,
    pub path: PathBuf,
}

/// Resolve the index lists of repositories and their cache paths.
pub fn index_lists(
    repositories: &[Arc<RepositoryEntry>],
    architecture: Architecture,
    directory: &Path,
) -> Vec<IndexList> {
    repositories
        .iter()
        .map(|repository| {
            let url = repository.packages_url(architecture, LIST_COMPRESSION);
            let path = url_to_filename(directory, &url);

            IndexList {
                repository: repository.clone(),
                url,
                path,
            }
        })
        .collect()
}

/// Outcome of refreshing index lists.
///
/// Per-list failures are recorded here rather than failing the refresh.
#[derive(Clone, Debug, Default)]
pub struct RefreshReport {
    /// Lists transferred.
    pub downloaded: usize,
    /// Lists already complete in the cache.
    pub hits: usize,
    /// URLs the remote reported as absent.
    pub missing: Vec<String>,
    /// Lists that failed to download, with the error message.
    pub failed: Vec<(String, String)>,
    /// Lists parsed into the catalog.
    pub lists_read: usize,
    /// Cached lists that could not be read and were deleted.
    pub corrupt: Vec<PathBuf>,
    /// Names in the catalog after reading.
    pub packages: usize,
    /// Whether the refresh stopped early.
    pub cancelled: bool,
}

/// Download index lists into their cache paths.
///
/// Each URL is probed first. Missing and failed lists are logged and skipped.
pub fn download_lists(
    fetcher: &dyn Fetcher,
    lists: &[IndexList],
    progress: &mut dyn FnMut(ProgressEvent),
    cancel: &CancellationToken,
    report: &mut RefreshReport,
) {
    for list in lists {
        if cancel.is_cancelled() {
            warn!("list download cancelled");
            report.cancelled = true;
            return;
        }

        let label = list.repository.label();

        match fetcher.exists(&list.url) {
            Ok(true) => {}
            Ok(false) => {
                error!("URL does not exist: {}", list.url);
                report.missing.push(list.url.clone());
                continue;
            }
            Err(e) => {
                error!("error probing {}: {}", list.url, e);
                report.failed.push((list.url.clone(), e.to_string()));
                continue;
            }
        }

        let result = fetcher.fetch(&list.url, &list.path, &label, &mut |p| {
            progress(ProgressEvent::ListDownload {
                label: p.label.to_string(),
                downloaded: p.downloaded,
                total: p.total,
            })
        });

        match result {
            Ok(FetchOutcome::Hit { .. }) => {
                progress(ProgressEvent::ListHit { label });
                report.hits += 1;
            }
            Ok(FetchOutcome::Downloaded { .. }) => {
                report.downloaded += 1;
            }
            Err(e) => {
                error!("error downloading {}: {}", list.url, e);
                report.failed.push((list.url.clone(), e.to_string()));
            }
        }
    }
}

/// Rebuild a catalog from cached index lists.
///
/// A list that doesn't exist is logged. A list that fails to decompress or parse
/// is logged and deleted so the next refresh fetches it again. Neither stops the
/// remaining lists from being read.
pub fn read_lists(
    catalog: &mut Catalog,
    lists: &[IndexList],
    progress: &mut dyn FnMut(ProgressEvent),
    cancel: &CancellationToken,
    report: &mut RefreshReport,
) {
    catalog.clear();
    let total = lists.len().max(1);

    for (i, list) in lists.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("reading package lists cancelled");
            report.cancelled = true;
            break;
        }

        progress(ProgressEvent::ListRead {
            label: list.repository.label(),
            percent: (i * 100 / total) as u8,
        });

        let fh = match std::fs::File::open(&list.path) {
            Ok(fh) => fh,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("package list does not exist: {}", list.path.display());
                continue;
            }
            Err(e) => {
                error!("{}: {}", list.path.display(), e);
                continue;
            }
        };

        let result = read_decompressed(fh, Compression::from_path(&list.path))
            .and_then(|reader| catalog.ingest(&list.repository, reader));

        match result {
            Ok(_) => {
                report.lists_read += 1;
            }
            Err(e) => {
                error!("{}: {}", list.path.display(), e);
                if let Err(e) = std::fs::remove_file(&list.path) {
                    warn!("unable to delete {}: {}", list.path.display(), e);
                }
                report.corrupt.push(list.path.clone());
            }
        }
    }

    if let Some(list) = lists.last() {
        progress(ProgressEvent::ListRead {
            label: list.repository.label(),
            percent: 100,
        });
    }

    report.packages = catalog.len();
    info!("{} packages available", catalog.len());
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{error::Result, transport::filesystem::FilesystemFetcher},
        std::io::Write,
    };

    fn gzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
        encoder.write_all(data)?;
        Ok(encoder.finish().into_result()?)
    }

    /// Lay out a mirror with one good section and one missing section.
    fn mirror(root: &Path) -> Result<Vec<Arc<RepositoryEntry>>> {
        let dir = root.join("mirror/dists/stable/main/binary-amd64");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join("Packages.gz"),
            gzip(b"Package: hello\nVersion: 2.10-3\nSize: 10\n\nPackage: world\nVersion: 1.0\n\n")?,
        )?;

        let base = url::Url::from_file_path(root.join("mirror")).unwrap();

        Ok(vec![
            Arc::new(RepositoryEntry::new(base.as_str(), "stable", "main")?),
            Arc::new(RepositoryEntry::new(base.as_str(), "stable", "contrib")?),
        ])
    }

    #[test]
    fn refresh_from_mirror() -> Result<()> {
        let td = tempfile::tempdir()?;
        let repositories = mirror(td.path())?;
        let lists = index_lists(&repositories, Architecture::Amd64, &td.path().join("lists"));

        assert!(lists[0].url.ends_with("/dists/stable/main/binary-amd64/Packages.gz"));

        let fetcher = FilesystemFetcher::default();
        let cancel = CancellationToken::new();
        let mut report = RefreshReport::default();
        let mut events = vec![];

        download_lists(&fetcher, &lists, &mut |e| events.push(e), &cancel, &mut report);
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.missing, vec![lists[1].url.clone()]);
        assert!(lists[0].path.exists());

        let mut catalog = Catalog::default();
        read_lists(&mut catalog, &lists, &mut |e| events.push(e), &cancel, &mut report);
        assert_eq!(report.lists_read, 1);
        assert_eq!(report.packages, 2);
        assert!(catalog.latest("hello")?.is_some());
        assert!(events.contains(&ProgressEvent::ListRead {
            label: "Repository => stable / contrib".to_string(),
            percent: 100
        }));

        // A second download finds the cached list complete.
        let mut report = RefreshReport::default();
        download_lists(&fetcher, &lists, &mut |_| {}, &cancel, &mut report);
        assert_eq!(report.hits, 1);
        assert_eq!(report.downloaded, 0);

        Ok(())
    }

    #[test]
    fn corrupt_list_is_deleted() -> Result<()> {
        let td = tempfile::tempdir()?;
        let repositories = mirror(td.path())?;
        let lists = index_lists(&repositories, Architecture::Amd64, td.path());

        std::fs::write(&lists[0].path, b"this is not gzip")?;

        let mut catalog = Catalog::default();
        let mut report = RefreshReport::default();
        read_lists(
            &mut catalog,
            &lists,
            &mut |_| {},
            &CancellationToken::new(),
            &mut report,
        );

        assert_eq!(report.corrupt, vec![lists[0].path.clone()]);
        assert!(!lists[0].path.exists());
        assert!(catalog.is_empty());

        Ok(())
    }

    #[test]
    fn cancelled_before_first_list() -> Result<()> {
        let td = tempfile::tempdir()?;
        let repositories = mirror(td.path())?;
        let lists = index_lists(&repositories, Architecture::Amd64, td.path());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut report = RefreshReport::default();
        download_lists(
            &FilesystemFetcher::default(),
            &lists,
            &mut |_| {},
            &cancel,
            &mut report,
        );

        assert!(report.cancelled);
        assert!(!lists[0].path.exists());

        Ok(())
    }
}
