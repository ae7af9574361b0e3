// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fetching from `file://` URLs.

Useful for mirrors on removable media or a shared filesystem. Resume semantics
match HTTP, with the source file's length and mtime standing in for the
`Content-Length` and `Last-Modified` headers.
*/

use {
    crate::{
        error::{OfflineAptError, Result},
        transport::{
            copy_with_progress, open_destination, plan_resume, FetchOutcome, FetchProgress,
            Fetcher, LocalState, RemoteState, ResumeAction,
        },
    },
    std::{
        io::{Seek, SeekFrom},
        path::{Path, PathBuf},
    },
    url::Url,
};

/// A [Fetcher] reading `file://` URLs.
#[derive(Clone, Debug, Default)]
pub struct FilesystemFetcher {}

impl FilesystemFetcher {
    fn source_path(url: &str) -> Result<PathBuf> {
        Url::parse(url)?
            .to_file_path()
            .map_err(|_| OfflineAptError::UnsupportedUrlScheme(url.to_string()))
    }
}

impl Fetcher for FilesystemFetcher {
    fn exists(&self, url: &str) -> Result<bool> {
        Ok(Self::source_path(url)?.is_file())
    }

    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        label: &str,
        progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<FetchOutcome> {
        let source = Self::source_path(url)?;
        let metadata = std::fs::metadata(&source)
            .map_err(|e| OfflineAptError::IoPath(format!("{}", source.display()), e))?;

        let remote = RemoteState {
            length: Some(metadata.len()),
            last_modified: metadata.modified().ok(),
        };
        let local = LocalState::from_path(destination)?;

        let offset = match plan_resume(local, &remote) {
            ResumeAction::Complete => {
                progress(FetchProgress {
                    label,
                    downloaded: metadata.len(),
                    total: Some(metadata.len()),
                });
                return Ok(FetchOutcome::Hit {
                    bytes: metadata.len(),
                });
            }
            ResumeAction::FromStart => 0,
            ResumeAction::Resume(offset) => offset,
        };

        let mut reader = std::fs::File::open(&source)
            .map_err(|e| OfflineAptError::IoPath(format!("{}", source.display()), e))?;
        reader.seek(SeekFrom::Start(offset))?;

        let mut fh = open_destination(destination, offset > 0)?;
        let bytes = copy_with_progress(reader, &mut fh, offset, remote.length, label, progress)?;

        Ok(FetchOutcome::Downloaded { bytes })
    }
}
