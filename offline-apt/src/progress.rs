// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Progress reporting and cancellation for long-running operations. */

use std::{
    fmt::{Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// An event emitted while refreshing lists or applying changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgressEvent {
    /// Bytes of an index list were written.
    ListDownload {
        label: String,
        downloaded: u64,
        total: Option<u64>,
    },
    /// An index list was already complete in the cache.
    ListHit { label: String },
    /// An index list is being parsed.
    ListRead { label: String, percent: u8 },
    /// Bytes of a package archive were written.
    PackageDownload {
        name: String,
        downloaded: u64,
        total: Option<u64>,
    },
    /// A package archive was already complete in the cache.
    PackageHit { name: String },
    /// A command is being run to install staged changes.
    Command { command: String },
    /// The operation completed.
    Finished,
}

impl Display for ProgressEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListDownload {
                label,
                downloaded,
                total: Some(total),
            }
            | Self::PackageDownload {
                name: label,
                downloaded,
                total: Some(total),
            } => write!(f, "{}: {} of {} bytes", label, downloaded, total),
            Self::ListDownload {
                label,
                downloaded,
                total: None,
            }
            | Self::PackageDownload {
                name: label,
                downloaded,
                total: None,
            } => write!(f, "{}: {} bytes", label, downloaded),
            Self::ListHit { label } => write!(f, "Hit: {}", label),
            Self::PackageHit { name } => write!(f, "Hit: {}", name),
            Self::ListRead { label, percent } => write!(f, "Reading {}: {}%", label, percent),
            Self::Command { command } => write!(f, "{}", command),
            Self::Finished => write!(f, "Done"),
        }
    }
}

/// A cloneable flag requesting that a batch operation stop early.
///
/// Operations check it before starting each repository, list or package and never
/// interrupt a write that is in progress.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a cancellation request, for every clone.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            ProgressEvent::ListDownload {
                label: "Repository => stable / main".to_string(),
                downloaded: 10,
                total: Some(20),
            }
            .to_string(),
            "Repository => stable / main: 10 of 20 bytes"
        );
        assert_eq!(
            ProgressEvent::PackageHit {
                name: "hello".to_string()
            }
            .to_string(),
            "Hit: hello"
        );
        assert_eq!(
            ProgressEvent::ListRead {
                label: "main".to_string(),
                percent: 50
            }
            .to_string(),
            "Reading main: 50%"
        );
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());

        token.reset();
        assert!(!clone.is_cancelled());
    }
}
