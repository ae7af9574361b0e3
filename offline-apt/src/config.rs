// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Configuration of an offline profile. */

use {
    crate::{
        error::{OfflineAptError, Result},
        sources::{parse_sources_list, Architecture, RepositoryEntry},
        status::DEFAULT_STATUS_PATH,
    },
    serde::{Deserialize, Serialize},
    std::path::PathBuf,
};

/// An explicitly configured HTTP proxy.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// URL of the proxy, e.g. `http://proxy.example.com:3128`.
    pub url: String,

    /// Username for basic authentication against the proxy.
    pub username: Option<String>,

    /// Password for basic authentication against the proxy.
    pub password: Option<String>,
}

/// Describes one offline profile: the machine packages are gathered for.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Architecture of the offline machine.
    pub architecture: String,

    /// Source lines in `sources.list` syntax.
    #[serde(default)]
    pub sources: Vec<String>,

    /// Path to a `sources.list` file whose lines are appended to `sources`.
    pub sources_file: Option<PathBuf>,

    /// Directory holding the cached `lists/` and `packages/`.
    pub download_directory: PathBuf,

    /// Profile status file.
    ///
    /// Read from the system status file if not defined.
    pub status_file: Option<PathBuf>,

    /// Proxy to send HTTP requests through.
    pub proxy: Option<ProxyConfig>,
}

impl SessionConfig {
    /// Construct a configuration with no sources.
    pub fn new(architecture: impl ToString, download_directory: impl Into<PathBuf>) -> Self {
        Self {
            architecture: architecture.to_string(),
            sources: vec![],
            sources_file: None,
            download_directory: download_directory.into(),
            status_file: None,
            proxy: None,
        }
    }

    /// The parsed architecture.
    pub fn architecture(&self) -> Result<Architecture> {
        Architecture::parse(&self.architecture)
    }

    /// Every source line, inline lines first.
    pub fn source_lines(&self) -> Result<Vec<String>> {
        let mut lines = self.sources.clone();

        if let Some(path) = &self.sources_file {
            let data = std::fs::read_to_string(path)
                .map_err(|e| OfflineAptError::IoPath(format!("{}", path.display()), e))?;
            lines.extend(data.lines().map(|s| s.to_string()));
        }

        Ok(lines)
    }

    /// Repository entries of every source line.
    pub fn repositories(&self) -> Result<Vec<RepositoryEntry>> {
        parse_sources_list(self.source_lines()?)
    }

    /// Status file to read the profile from.
    pub fn status_path(&self) -> PathBuf {
        self.status_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATUS_PATH))
    }
}

#[cfg(test)]
mod test {
    use {super::*, std::io::Write};

    #[test]
    fn status_path() {
        let mut config = SessionConfig::new("amd64", "/srv/offline");
        assert_eq!(config.status_path(), PathBuf::from(DEFAULT_STATUS_PATH));

        config.status_file = Some(PathBuf::from("/srv/offline/status"));
        assert_eq!(config.status_path(), PathBuf::from("/srv/offline/status"));
    }

    #[test]
    fn sources_file_appended() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("sources.list");

        let mut fh = std::fs::File::create(&path)?;
        fh.write_all(b"deb http://deb.debian.org/debian bullseye main contrib\n")?;

        let mut config = SessionConfig::new("x86_64", td.path());
        config.sources = vec!["deb http://security.debian.org/ bullseye-security main".into()];
        config.sources_file = Some(path);

        assert_eq!(config.architecture()?, Architecture::Amd64);

        let repos = config.repositories()?;
        assert_eq!(repos.len(), 3);
        assert_eq!(repos[0].distribution(), "bullseye-security");
        assert_eq!(repos[2].section(), "contrib");

        Ok(())
    }

    #[test]
    fn invalid_configuration() {
        let mut config = SessionConfig::new("arm64", "/tmp");
        config.sources = vec!["deb http://deb.debian.org/debian".into()];

        assert!(matches!(
            config.architecture(),
            Err(OfflineAptError::UnsupportedArchitecture(_))
        ));
        assert!(matches!(
            config.repositories(),
            Err(OfflineAptError::InvalidRepository(_))
        ));
    }
}
