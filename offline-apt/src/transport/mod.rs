// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fetching remote files into a local cache.

Index lists and package archives are fetched through the [Fetcher] trait. Fetches
are resumable: a partially written destination file is continued from its current
length unless the remote copy is newer or shorter, in which case it is fetched
again from the start.
*/

use {
    crate::error::{OfflineAptError, Result},
    std::{
        io::{Read, Write},
        path::Path,
        time::SystemTime,
    },
};

pub mod filesystem;
#[cfg(feature = "http")]
pub mod http;

const CHUNK_SIZE: usize = 8192;

/// Progress of an in-flight fetch.
#[derive(Clone, Copy, Debug)]
pub struct FetchProgress<'a> {
    /// Display label of the fetched item.
    pub label: &'a str,
    /// Bytes present in the destination file so far.
    pub downloaded: u64,
    /// Expected final size, if the remote advertised one.
    pub total: Option<u64>,
}

/// The result of a successful fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchOutcome {
    /// The destination was already complete. Nothing was transferred.
    Hit { bytes: u64 },
    /// Data was transferred. `bytes` is the final size of the destination.
    Downloaded { bytes: u64 },
}

impl FetchOutcome {
    /// Final size of the destination file.
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Hit { bytes } | Self::Downloaded { bytes } => *bytes,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Capability to probe and fetch URLs.
pub trait Fetcher {
    /// Whether the URL refers to an existing remote file.
    fn exists(&self, url: &str) -> Result<bool>;

    /// Fetch a URL into a destination path, resuming a partial file where possible.
    ///
    /// `progress` is invoked after each chunk is written.
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        label: &str,
        progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<FetchOutcome>;
}

/// Size and modification time of a local destination file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LocalState {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl LocalState {
    /// Stat a path, returning `None` if it doesn't exist.
    pub fn from_path(path: &Path) -> Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(Some(Self {
                size: metadata.len(),
                modified: metadata.modified().ok(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OfflineAptError::IoPath(format!("{}", path.display()), e)),
        }
    }
}

/// What the remote end advertises about a file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RemoteState {
    pub length: Option<u64>,
    pub last_modified: Option<SystemTime>,
}

/// How to bring a destination file up to date.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResumeAction {
    /// The local file is complete.
    Complete,
    /// Discard any local file and transfer everything.
    FromStart,
    /// Append starting at the given offset.
    Resume(u64),
}

/// Decide how to fetch a file given local and remote state.
///
/// A remote file modified after the local one invalidates it. A local file whose
/// size equals the remote length is complete. One that is longer is corrupt and
/// discarded.
pub fn plan_resume(local: Option<LocalState>, remote: &RemoteState) -> ResumeAction {
    let mut downloaded = match local {
        Some(local) => local.size,
        None => return ResumeAction::FromStart,
    };

    if let (Some(local_modified), Some(remote_modified)) = (
        local.and_then(|l| l.modified),
        remote.last_modified,
    ) {
        if local_modified < remote_modified {
            downloaded = 0;
        }
    }

    if let Some(length) = remote.length {
        if downloaded == length && local.map(|l| l.size) == Some(length) {
            return ResumeAction::Complete;
        } else if downloaded > length {
            downloaded = 0;
        }
    }

    if downloaded == 0 {
        ResumeAction::FromStart
    } else {
        ResumeAction::Resume(downloaded)
    }
}

/// Copy a reader into a writer in whole chunks, reporting progress after each one.
///
/// `start` is the number of bytes already present in the destination. Returns the
/// destination size after the copy.
pub fn copy_with_progress(
    mut reader: impl Read,
    writer: &mut impl Write,
    start: u64,
    total: Option<u64>,
    label: &str,
    progress: &mut dyn FnMut(FetchProgress),
) -> Result<u64> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut downloaded = start;

    loop {
        let count = reader.read(&mut buf)?;
        if count == 0 {
            break;
        }

        writer.write_all(&buf[0..count])?;
        downloaded += count as u64;

        progress(FetchProgress {
            label,
            downloaded,
            total,
        });
    }

    writer.flush()?;

    Ok(downloaded)
}

/// Open a destination for writing, either truncating it or appending to it.
pub(crate) fn open_destination(path: &Path, append: bool) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OfflineAptError::IoPath(format!("{}", parent.display()), e))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.create(true);

    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }

    options
        .open(path)
        .map_err(|e| OfflineAptError::IoPath(format!("{}", path.display()), e))
}

/// A [Fetcher] dispatching on URL scheme.
///
/// `file://` URLs are served from the filesystem. `http://` and `https://` URLs go
/// through an HTTP client when the `http` feature is enabled.
pub struct DefaultFetcher {
    filesystem: filesystem::FilesystemFetcher,
    #[cfg(feature = "http")]
    http: http::HttpFetcher,
}

impl DefaultFetcher {
    #[cfg(feature = "http")]
    pub fn new(http: http::HttpFetcher) -> Self {
        Self {
            filesystem: filesystem::FilesystemFetcher::default(),
            http,
        }
    }

    #[cfg(not(feature = "http"))]
    pub fn new() -> Self {
        Self {
            filesystem: filesystem::FilesystemFetcher::default(),
        }
    }

    fn select(&self, url: &str) -> Result<&dyn Fetcher> {
        let parsed = url::Url::parse(url)?;

        match parsed.scheme() {
            "file" => Ok(&self.filesystem),
            #[cfg(feature = "http")]
            "http" | "https" => Ok(&self.http),
            _ => Err(OfflineAptError::UnsupportedUrlScheme(url.to_string())),
        }
    }
}

impl Fetcher for DefaultFetcher {
    fn exists(&self, url: &str) -> Result<bool> {
        self.select(url)?.exists(url)
    }

    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        label: &str,
        progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<FetchOutcome> {
        self.select(url)?.fetch(url, destination, label, progress)
    }
}
