// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository sources and architectures.

APT sources lists contain lines like `deb http://deb.debian.org/debian bookworm main contrib`.
Each section (component) on such a line is a separate [RepositoryEntry] with its own
`Packages` index per architecture.
*/

use {
    crate::{
        error::{OfflineAptError, Result},
        io::Compression,
    },
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
        str::FromStr,
    },
    strum_macros::{AsRefStr, Display as StrumDisplay, EnumString},
};

/// A machine architecture whose binary indices can be fetched.
#[derive(AsRefStr, Clone, Copy, Debug, EnumString, Eq, Hash, PartialEq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Armel,
    I386,
    Ia64,
    Powerpc,
    Sparc,
}

impl Architecture {
    /// Parse an architecture token.
    ///
    /// `x86_64`, as reported by `uname -m`, is accepted as `amd64`.
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = match normalized.as_str() {
            "x86_64" => "amd64",
            other => other,
        };

        Self::from_str(normalized)
            .map_err(|_| OfflineAptError::UnsupportedArchitecture(s.to_string()))
    }

    /// Name of the directory holding binary indices for this architecture.
    pub fn binary_directory(&self) -> String {
        format!("binary-{}", self)
    }
}

/// Join URL components, ignoring leading and trailing slashes on each.
pub fn url_join<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(|p| p.trim_matches('/'))
        .collect::<Vec<_>>()
        .join("/")
}

/// Derive the local cache filename for a URL.
///
/// The scheme is stripped and slashes become underscores, so
/// `http://example.com/debian/dists/stable/main/binary-amd64/Packages.gz` is stored as
/// `example.com_debian_dists_stable_main_binary-amd64_Packages.gz`.
pub fn url_to_filename(directory: &Path, url: &str) -> PathBuf {
    let without_scheme = url.split_once("//").map(|(_, rest)| rest).unwrap_or(url);

    directory.join(without_scheme.replace('/', "_"))
}

/// A single `deb` repository section.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RepositoryEntry {
    base_url: String,
    distribution: String,
    section: String,
    url: String,
}

impl RepositoryEntry {
    /// Construct an instance from its components.
    pub fn new(base_url: &str, distribution: &str, section: &str) -> Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| OfflineAptError::InvalidRepository(format!("{}: {}", base_url, e)))?;

        Ok(Self {
            base_url: base_url.to_string(),
            distribution: distribution.to_string(),
            section: section.to_string(),
            url: url_join([base_url, "dists", distribution, section]),
        })
    }

    /// The repository type. Only binary (`deb`) repositories are supported.
    pub fn kind(&self) -> &'static str {
        "deb"
    }

    /// The archive root URL, as written in the sources line.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The distribution (suite or codename).
    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    /// The section (component).
    pub fn section(&self) -> &str {
        &self.section
    }

    /// The resolved URL of this section: `<base>/dists/<distribution>/<section>`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL of the `Packages` index for an architecture.
    pub fn packages_url(&self, architecture: Architecture, compression: Compression) -> String {
        url_join([
            self.url.as_str(),
            architecture.binary_directory().as_str(),
            &format!("Packages{}", compression.extension()),
        ])
    }

    /// URL of a package archive given its `Filename` field.
    ///
    /// `Filename` paths are relative to the archive root, the part of the resolved
    /// URL before `dists`.
    pub fn archive_url(&self, filename: &str) -> String {
        url_join([self.base_url.as_str(), filename])
    }

    /// Human readable label used in progress output.
    pub fn label(&self) -> String {
        format!("Repository => {} / {}", self.distribution, self.section)
    }
}

impl Display for RepositoryEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.kind(),
            self.base_url,
            self.distribution,
            self.section
        )
    }
}

/// Parse a single sources line.
///
/// Returns `Ok(None)` for lines that are ignored: blanks, comments and `deb-src`
/// lines. A `deb` line yields one entry per section.
pub fn parse_source_line(line: &str) -> Result<Option<Vec<RepositoryEntry>>> {
    let content = line.split('#').next().unwrap_or("").trim();

    if content.is_empty() {
        return Ok(None);
    }

    let mut tokens = content.split_whitespace().peekable();

    match tokens.next() {
        Some("deb") => {}
        Some("deb-src") => return Ok(None),
        _ => return Err(OfflineAptError::InvalidRepository(line.to_string())),
    }

    // Skip an `[arch=amd64 signed-by=...]` options block.
    if tokens.peek().map(|t| t.starts_with('[')).unwrap_or(false) {
        for token in tokens.by_ref() {
            if token.ends_with(']') {
                break;
            }
        }
    }

    let base_url = tokens
        .next()
        .ok_or_else(|| OfflineAptError::InvalidRepository(line.to_string()))?;
    let distribution = tokens
        .next()
        .ok_or_else(|| OfflineAptError::InvalidRepository(line.to_string()))?;
    let sections = tokens.collect::<Vec<_>>();

    if sections.is_empty() {
        return Err(OfflineAptError::InvalidRepository(line.to_string()));
    }

    let entries = sections
        .into_iter()
        .map(|section| {
            RepositoryEntry::new(base_url, distribution, section)
                .map_err(|_| OfflineAptError::InvalidRepository(line.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(entries))
}

/// Parse the lines of a sources list into repository entries.
///
/// Fails on the first invalid line, naming it.
pub fn parse_sources_list<S: AsRef<str>>(
    lines: impl IntoIterator<Item = S>,
) -> Result<Vec<RepositoryEntry>> {
    let mut entries = vec![];

    for line in lines {
        if let Some(parsed) = parse_source_line(line.as_ref())? {
            entries.extend(parsed);
        }
    }

    Ok(entries)
}
