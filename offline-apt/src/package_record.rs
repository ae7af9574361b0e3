// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package records parsed from index and status stanzas. */

use {
    crate::{
        control::{ControlParagraph, LONG_FIELD},
        error::{OfflineAptError, Result},
        io::{ChecksumType, ContentDigest},
        package_version::PackageVersion,
        sources::RepositoryEntry,
    },
    std::{
        io::Write,
        str::FromStr,
        sync::{Arc, Weak},
    },
    strum_macros::{AsRefStr, Display, EnumString},
};

/// Dependency fields consulted when marking a package, in evaluation order.
pub const BINARY_DEPENDENCY_FIELDS: &[&str] = &["Pre-Depends", "Depends", "Recommends"];

/// The install or pending state of a package in the status table.
///
/// Serialized forms are the exact strings stored in the `Status` field.
#[derive(AsRefStr, Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
pub enum PackageStatus {
    #[strum(serialize = "install ok installed")]
    Installed,
    #[strum(serialize = "to be downloaded")]
    ToBeDownloaded,
    #[strum(serialize = "dependency to be downloaded")]
    DependencyToBeDownloaded,
    #[strum(serialize = "to be installed")]
    ToBeInstalled,
    #[strum(serialize = "dependency to be installed")]
    DependencyToBeInstalled,
}

impl PackageStatus {
    /// The status a freshly marked package receives.
    pub fn marked(as_dependency: bool) -> Self {
        if as_dependency {
            Self::DependencyToBeDownloaded
        } else {
            Self::ToBeDownloaded
        }
    }

    /// Whether the package archive still has to be downloaded.
    pub fn is_pending_download(&self) -> bool {
        matches!(self, Self::ToBeDownloaded | Self::DependencyToBeDownloaded)
    }

    /// Whether the package archive is downloaded and waiting to be installed.
    pub fn is_pending_install(&self) -> bool {
        matches!(self, Self::ToBeInstalled | Self::DependencyToBeInstalled)
    }

    /// Whether this entry was pulled in to satisfy another package.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            Self::DependencyToBeDownloaded | Self::DependencyToBeInstalled
        )
    }

    /// The status to transition to once the package archive is downloaded.
    pub fn after_download(&self) -> Option<Self> {
        match self {
            Self::ToBeDownloaded => Some(Self::ToBeInstalled),
            Self::DependencyToBeDownloaded => Some(Self::DependencyToBeInstalled),
            _ => None,
        }
    }
}

/// A package stanza from a `Packages` index or a status file.
///
/// The fields this crate acts on are held explicitly. Every other field is kept,
/// in input order, in an extension [ControlParagraph].
///
/// Records parsed from an index carry a weak reference to the [RepositoryEntry]
/// they came from. The owning catalog keeps the repositories alive.
#[derive(Clone, Debug)]
pub struct PackageRecord {
    package: String,
    version: Option<String>,
    status: Option<PackageStatus>,
    provides: Option<String>,
    long_description: Option<String>,
    extra: ControlParagraph,
    repository: Weak<RepositoryEntry>,
}

impl PartialEq for PackageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.package == other.package
            && self.version == other.version
            && self.status == other.status
            && self.provides == other.provides
            && self.long_description == other.long_description
            && self.extra == other.extra
    }
}

impl Eq for PackageRecord {}

impl TryFrom<ControlParagraph> for PackageRecord {
    type Error = OfflineAptError;

    fn try_from(mut paragraph: ControlParagraph) -> Result<Self> {
        let package = paragraph
            .remove_field("Package")
            .ok_or(OfflineAptError::RecordRequiredFieldMissing("Package"))?
            .value_str()
            .to_string();

        let version = paragraph
            .remove_field("Version")
            .map(|f| f.value_str().to_string());
        let provides = paragraph
            .remove_field("Provides")
            .map(|f| f.value_str().to_string());
        let long_description = paragraph
            .remove_field(LONG_FIELD)
            .map(|f| f.value_str().to_string());

        // Unrecognized statuses stay in the extension fields so nothing is lost.
        let status = match paragraph.field_str("Status").map(PackageStatus::from_str) {
            Some(Ok(status)) => {
                paragraph.remove_field("Status");
                Some(status)
            }
            _ => None,
        };

        Ok(Self {
            package,
            version,
            status,
            provides,
            long_description,
            extra: paragraph,
            repository: Weak::new(),
        })
    }
}

impl PackageRecord {
    /// Construct a bare record having only a name and version.
    pub fn new(package: impl ToString, version: impl ToString) -> Self {
        Self {
            package: package.to_string(),
            version: Some(version.to_string()),
            status: None,
            provides: None,
            long_description: None,
            extra: ControlParagraph::default(),
            repository: Weak::new(),
        }
    }

    /// The `Package` field.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The `Version` field as its original string.
    pub fn version_str(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The `Version` field parsed into a [PackageVersion].
    pub fn parsed_version(&self) -> Result<PackageVersion> {
        let version = self
            .version
            .as_deref()
            .ok_or(OfflineAptError::RecordRequiredFieldMissing("Version"))?;

        Ok(PackageVersion::parse(version)?)
    }

    /// The recognized `Status` of this record, if any.
    pub fn status(&self) -> Option<PackageStatus> {
        self.status
    }

    /// Replace the `Status` of this record.
    pub fn set_status(&mut self, status: PackageStatus) {
        self.status = Some(status);
    }

    /// The raw `Provides` field.
    pub fn provides(&self) -> Option<&str> {
        self.provides.as_deref()
    }

    /// Set the raw `Provides` field.
    pub fn set_provides(&mut self, provides: impl ToString) {
        self.provides = Some(provides.to_string());
    }

    /// Names of virtual packages provided by this one.
    ///
    /// Version constraints on provided names (`foo (= 1.0)`) are dropped.
    pub fn provided_names(&self) -> impl Iterator<Item = &str> {
        self.provides
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(|entry| entry.split_whitespace().next())
    }

    /// Concatenated continuation lines of the stanza, verbatim.
    pub fn long_description(&self) -> Option<&str> {
        self.long_description.as_deref()
    }

    /// Obtain the raw value of any field, including the explicitly held ones.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("Package") {
            Some(&self.package)
        } else if name.eq_ignore_ascii_case("Version") {
            self.version_str()
        } else if name.eq_ignore_ascii_case("Provides") {
            self.provides()
        } else if name.eq_ignore_ascii_case(LONG_FIELD) {
            self.long_description()
        } else if name.eq_ignore_ascii_case("Status") {
            self.status
                .as_ref()
                .map(AsRef::<str>::as_ref)
                .or_else(|| self.extra.field_str(name))
        } else {
            self.extra.field_str(name)
        }
    }

    /// Set an extension field.
    pub fn set_field(&mut self, name: impl ToString, value: impl ToString) {
        self.extra.set_field_from_string(name, value);
    }

    /// The `Filename` field: the archive path relative to the repository root.
    pub fn filename(&self) -> Option<&str> {
        self.extra.field_str("Filename")
    }

    /// The final path component of the `Filename` field.
    pub fn archive_basename(&self) -> Option<&str> {
        self.filename()
            .map(|f| f.rsplit_once('/').map(|(_, s)| s).unwrap_or(f))
    }

    /// The `Size` field, parsed to a [u64].
    pub fn size(&self) -> Option<Result<u64>> {
        self.extra.field_u64("Size")
    }

    /// The `Depends` field.
    pub fn depends(&self) -> Option<&str> {
        self.extra.field_str("Depends")
    }

    /// The `Pre-Depends` field.
    pub fn pre_depends(&self) -> Option<&str> {
        self.extra.field_str("Pre-Depends")
    }

    /// The `Recommends` field.
    pub fn recommends(&self) -> Option<&str> {
        self.extra.field_str("Recommends")
    }

    /// Every dependency expression of the package.
    ///
    /// Expressions from `Pre-Depends`, `Depends` and `Recommends` are returned in that
    /// order. Each expression may hold `|` separated alternatives.
    pub fn dependency_expressions(&self) -> Vec<&str> {
        BINARY_DEPENDENCY_FIELDS
            .iter()
            .filter_map(|field| self.extra.field_str(field))
            .flat_map(|value| value.split(','))
            .map(|expression| expression.trim())
            .filter(|expression| !expression.is_empty())
            .collect()
    }

    /// The `SHA256` field.
    pub fn sha256(&self) -> Option<&str> {
        self.extra.field_str(ChecksumType::Sha256.field_name())
    }

    /// The `MD5sum` field.
    pub fn md5sum(&self) -> Option<&str> {
        self.extra.field_str(ChecksumType::Md5.field_name())
    }

    /// The strongest content digest advertised by the record.
    pub fn content_digest(&self) -> Option<Result<ContentDigest>> {
        ChecksumType::preferred_order().find_map(|checksum| {
            self.extra
                .field_str(checksum.field_name())
                .map(|hex| ContentDigest::from_hex_digest(checksum, hex))
        })
    }

    /// The repository this record was indexed from, if it is still configured.
    pub fn repository(&self) -> Option<Arc<RepositoryEntry>> {
        self.repository.upgrade()
    }

    /// Attach the repository this record was indexed from.
    pub fn set_repository(&mut self, repository: &Arc<RepositoryEntry>) {
        self.repository = Arc::downgrade(repository);
    }

    /// Write the fields a status file retains, in `Package`, `Status`, `Version`,
    /// `Provides` order, without a terminating blank line.
    pub fn write_status_stanza<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "Package: {}", self.package)?;
        if let Some(status) = self.field_str("Status") {
            writeln!(writer, "Status: {}", status)?;
        }
        if let Some(version) = &self.version {
            writeln!(writer, "Version: {}", version)?;
        }
        if let Some(provides) = &self.provides {
            writeln!(writer, "Provides: {}", provides)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{control::StanzaReader, sources::parse_source_line},
        indoc::indoc,
    };

    fn record(s: &str) -> Result<PackageRecord> {
        let paragraph = StanzaReader::new(std::io::Cursor::new(s.as_bytes()))
            .next()
            .expect("stanza should be present")?;

        PackageRecord::try_from(paragraph)
    }

    #[test]
    fn status_strings() {
        assert_eq!(
            PackageStatus::from_str("install ok installed").unwrap(),
            PackageStatus::Installed
        );
        assert_eq!(
            PackageStatus::DependencyToBeDownloaded.to_string(),
            "dependency to be downloaded"
        );
        assert!(PackageStatus::from_str("deinstall ok config-files").is_err());
        assert_eq!(
            PackageStatus::ToBeDownloaded.after_download(),
            Some(PackageStatus::ToBeInstalled)
        );
        assert_eq!(
            PackageStatus::DependencyToBeDownloaded.after_download(),
            Some(PackageStatus::DependencyToBeInstalled)
        );
        assert_eq!(PackageStatus::Installed.after_download(), None);
        assert!(PackageStatus::DependencyToBeInstalled.is_pending_install());
        assert!(PackageStatus::marked(true).is_dependency());
    }

    #[test]
    fn from_index_stanza() -> Result<()> {
        let r = record(indoc! {"
            Package: libfoo1
            Version: 1:2.0-3
            Provides: libfoo, libfoo-abi (= 2)
            Pre-Depends: dpkg (>= 1.15)
            Depends: libc6 (>= 2.4), zlib1g | zlib-ng
            Recommends: foo-data
            Filename: pool/main/libf/libfoo/libfoo1_2.0-3_amd64.deb
            Size: 52012
            SHA256: 0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef
            Description: foo library
             It does foo.
        "})?;

        assert_eq!(r.package(), "libfoo1");
        assert_eq!(r.parsed_version()?, PackageVersion::parse("1:2.0-3")?);
        assert_eq!(r.status(), None);
        assert_eq!(
            r.provided_names().collect::<Vec<_>>(),
            vec!["libfoo", "libfoo-abi"]
        );
        assert_eq!(
            r.dependency_expressions(),
            vec![
                "dpkg (>= 1.15)",
                "libc6 (>= 2.4)",
                "zlib1g | zlib-ng",
                "foo-data"
            ]
        );
        assert_eq!(r.archive_basename(), Some("libfoo1_2.0-3_amd64.deb"));
        assert_eq!(r.size().unwrap()?, 52012);
        assert!(matches!(
            r.content_digest().unwrap()?,
            ContentDigest::Sha256(_)
        ));
        assert!(r.sha256().unwrap().starts_with("0123"));
        assert_eq!(r.md5sum(), None);
        assert_eq!(r.long_description(), Some(" It does foo.\n"));
        assert_eq!(r.field_str("description"), Some("foo library"));

        Ok(())
    }

    #[test]
    fn missing_package_rejected() {
        assert!(matches!(
            record("Version: 1.0\n\n"),
            Err(OfflineAptError::RecordRequiredFieldMissing("Package"))
        ));
    }

    #[test]
    fn unrecognized_status_retained_as_field() -> Result<()> {
        let r = record("Package: foo\nStatus: deinstall ok config-files\n\n")?;

        assert_eq!(r.status(), None);
        assert_eq!(r.field_str("Status"), Some("deinstall ok config-files"));

        Ok(())
    }

    #[test]
    fn status_stanza_field_order() -> Result<()> {
        let mut r = record("Version: 1.0\nProvides: bar\nPackage: foo\nSize: 10\n\n")?;
        r.set_status(PackageStatus::ToBeInstalled);

        let mut buf = vec![];
        r.write_status_stanza(&mut buf)?;

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "Package: foo\nStatus: to be installed\nVersion: 1.0\nProvides: bar\n"
        );

        Ok(())
    }

    #[test]
    fn repository_backreference_is_weak() -> Result<()> {
        let repo = Arc::new(
            parse_source_line("deb http://example.com/debian stable main")?
                .expect("deb line")
                .remove(0),
        );

        let mut r = PackageRecord::new("foo", "1.0");
        r.set_repository(&repo);
        assert_eq!(r.repository().unwrap().section(), "main");

        drop(repo);
        assert!(r.repository().is_none());

        Ok(())
    }
}
