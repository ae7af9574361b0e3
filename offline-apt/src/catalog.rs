// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! In-memory catalog of available packages.

The catalog maps each package name, and every name a package provides, to all
records seen for it across repositories. It is rebuilt from the cached index
lists on every refresh.
*/

use {
    crate::{
        control::StanzaReader,
        error::Result,
        package_record::PackageRecord,
        package_version::PackageVersion,
        sources::RepositoryEntry,
    },
    log::{debug, warn},
    std::{
        collections::HashMap,
        io::BufRead,
        sync::Arc,
    },
};

/// Available packages, indexed by name and provided names.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    packages: HashMap<String, Vec<Arc<PackageRecord>>>,
    /// Keeps the repositories that records point back to alive.
    repositories: Vec<Arc<RepositoryEntry>>,
}

impl Catalog {
    /// Remove all records.
    pub fn clear(&mut self) {
        self.packages.clear();
        self.repositories.clear();
    }

    /// Parse an index stream and add every record to the catalog.
    ///
    /// Stanzas without a `Package` field are logged and skipped. I/O errors from
    /// the stream abort this stream only; records read before the error stay.
    ///
    /// Returns the number of records added.
    pub fn ingest(
        &mut self,
        repository: &Arc<RepositoryEntry>,
        reader: impl BufRead,
    ) -> Result<usize> {
        if !self.repositories.iter().any(|r| Arc::ptr_eq(r, repository)) {
            self.repositories.push(repository.clone());
        }

        let mut count = 0;

        for paragraph in StanzaReader::new(reader) {
            let paragraph = paragraph?;

            let mut record = match PackageRecord::try_from(paragraph) {
                Ok(record) => record,
                Err(e) => {
                    warn!("skipping malformed stanza in {}: {}", repository, e);
                    continue;
                }
            };

            record.set_repository(repository);
            self.insert(record);
            count += 1;
        }

        debug!("{}: {} records", repository.label(), count);

        Ok(count)
    }

    /// Add a record under its own name and every name it provides.
    pub fn insert(&mut self, record: PackageRecord) {
        let record = Arc::new(record);

        let mut names = vec![record.package().to_string()];
        for name in record.provided_names() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        for name in names {
            self.packages.entry(name).or_default().push(record.clone());
        }
    }

    /// All records known under a name. Empty if the name is unknown.
    pub fn versions(&self, name: &str) -> &[Arc<PackageRecord>] {
        self.packages.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The record with the greatest version under a name.
    ///
    /// Fails if any candidate has a malformed version.
    pub fn latest(&self, name: &str) -> Result<Option<Arc<PackageRecord>>> {
        let mut best: Option<(PackageVersion, &Arc<PackageRecord>)> = None;

        for record in self.versions(name) {
            let version = record.parsed_version()?;

            match &best {
                Some((current, _)) if &version <= current => {}
                _ => {
                    best = Some((version, record));
                }
            }
        }

        Ok(best.map(|(_, record)| record.clone()))
    }

    /// The record under a name whose version equals the given version.
    ///
    /// Versions compare by Debian ordering, so `0:1.0` matches `1.0`.
    pub fn exact(&self, name: &str, version: &PackageVersion) -> Option<Arc<PackageRecord>> {
        self.versions(name)
            .iter()
            .find(|record| {
                record
                    .parsed_version()
                    .map(|v| &v == version)
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Like [Self::exact] but takes the version as a string.
    ///
    /// Falls back to literal comparison if the string does not parse.
    pub fn exact_str(&self, name: &str, version: &str) -> Option<Arc<PackageRecord>> {
        match PackageVersion::parse(version) {
            Ok(version) => self.exact(name, &version),
            Err(_) => self
                .versions(name)
                .iter()
                .find(|record| record.version_str() == Some(version))
                .cloned(),
        }
    }

    /// Whether any record is known under a name.
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// All indexed names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.packages.keys().map(|k| k.as_str()).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    /// Number of indexed names.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::error::OfflineAptError, indoc::indoc};

    const INDEX: &str = indoc! {"
        Package: libfoo
        Version: 2.1
        Provides: libfoo-compat
        Filename: pool/main/libf/libfoo/libfoo_2.1_amd64.deb
        Size: 1000

        Package: libfoo
        Version: 1:0.9
        Filename: pool/main/libf/libfoo/libfoo_0.9_amd64.deb
        Size: 900

        Package: libfoo
        Version: 2.0
        Filename: pool/main/libf/libfoo/libfoo_2.0_amd64.deb
        Size: 950

        Version: 1.0
        Filename: pool/nameless.deb

        Package: bar
        Version: 3.0
        Depends: libfoo (>= 2.0)
    "};

    fn repository() -> Arc<RepositoryEntry> {
        Arc::new(RepositoryEntry::new("http://example.com/debian", "stable", "main").unwrap())
    }

    fn catalog() -> Result<(Catalog, Arc<RepositoryEntry>)> {
        let repo = repository();
        let mut catalog = Catalog::default();
        let count = catalog.ingest(&repo, std::io::Cursor::new(INDEX.as_bytes()))?;
        assert_eq!(count, 4);

        Ok((catalog, repo))
    }

    #[test]
    fn ingest_and_lookup() -> Result<()> {
        let (catalog, repo) = catalog()?;

        assert_eq!(catalog.versions("libfoo").len(), 3);
        assert_eq!(catalog.versions("libfoo-compat").len(), 1);
        assert!(catalog.versions("missing").is_empty());
        assert_eq!(catalog.names(), vec!["bar", "libfoo", "libfoo-compat"]);
        assert_eq!(catalog.len(), 3);

        let bar = catalog.latest("bar")?.unwrap();
        assert!(Arc::ptr_eq(&bar.repository().unwrap(), &repo));

        Ok(())
    }

    #[test]
    fn latest_uses_version_ordering() -> Result<()> {
        let (catalog, _) = catalog()?;

        // The epoch makes 1:0.9 the newest.
        assert_eq!(
            catalog.latest("libfoo")?.unwrap().version_str(),
            Some("1:0.9")
        );
        assert_eq!(
            catalog.latest("libfoo-compat")?.unwrap().version_str(),
            Some("2.1")
        );
        assert!(catalog.latest("missing")?.is_none());

        Ok(())
    }

    #[test]
    fn exact_lookup() -> Result<()> {
        let (catalog, _) = catalog()?;

        assert_eq!(
            catalog.exact_str("libfoo", "2.0").unwrap().size().unwrap()?,
            950
        );
        assert_eq!(
            catalog.exact_str("libfoo", "0:2.1").unwrap().version_str(),
            Some("2.1")
        );
        assert!(catalog.exact_str("libfoo", "3.0").is_none());
        assert!(catalog.exact_str("missing", "1.0").is_none());

        Ok(())
    }

    #[test]
    fn malformed_version_fails_latest() -> Result<()> {
        let mut catalog = Catalog::default();
        catalog.insert(PackageRecord::new("broken", "not-a-version"));

        assert!(matches!(
            catalog.latest("broken"),
            Err(OfflineAptError::MalformedVersion(_))
        ));

        Ok(())
    }
}
