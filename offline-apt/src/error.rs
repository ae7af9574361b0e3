// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum OfflineAptError {
    #[error("malformed version string: {0}")]
    MalformedVersion(#[from] VersionError),

    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("repository is either invalid or not supported: {0}")]
    InvalidRepository(String),

    #[error("unknown version comparison operator: {0}")]
    UnknownOperator(String),

    #[error("package {0} is already {1}")]
    AlreadySatisfied(String, String),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("date parsing error: {0:?}")]
    DateParse(#[from] mailparse::MailParseError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("required field missing in package record: {0}")]
    RecordRequiredFieldMissing(&'static str),

    #[error("hex parsing error on digest {0}: {1:?}")]
    DigestBadHex(String, hex::FromHexError),

    #[error("digest mismatch for {path}: expected {expected}, got {got}")]
    DigestMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("size mismatch for {path}: expected {expected} bytes, got {got}")]
    SizeMismatch { path: String, expected: u64, got: u64 },

    #[error("bad HTTP status fetching {0}: {1}")]
    HttpStatus(String, u16),

    #[error("unable to authenticate to proxy while fetching {0}")]
    ProxyAuthentication(String),

    #[error("URL scheme not supported by this fetcher: {0}")]
    UnsupportedUrlScheme(String),

    #[error("package {0} has no repository to download from")]
    MissingRepository(String),

    #[error("install command failed ({0}): {1}")]
    InstallCommand(String, String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, OfflineAptError>;
