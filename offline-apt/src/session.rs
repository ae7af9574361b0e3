// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Offline profile sessions.

A [Session] owns everything describing one offline machine: its architecture
and repositories, the catalog of available packages read from cached index
lists, and the status table of installed and pending packages. The
[PackageBackend] trait is the operation set front ends drive.
*/

use {
    crate::{
        catalog::Catalog,
        changes::{ApplyReport, ChangeSet, ChangeSize},
        config::SessionConfig,
        error::Result,
        install::{InstallPlan, Installer},
        lists::{download_lists, index_lists, read_lists, IndexList, RefreshReport},
        package_record::{PackageRecord, PackageStatus},
        package_version::PackageVersion,
        progress::{CancellationToken, ProgressEvent},
        resolver::Resolver,
        sources::{parse_sources_list, Architecture, RepositoryEntry},
        status::StatusTable,
        transport::{DefaultFetcher, Fetcher},
    },
    log::{info, warn},
    std::{
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// Operations a package front end drives.
pub trait PackageBackend {
    /// Set the architecture of the offline machine.
    fn set_architecture(&mut self, architecture: &str) -> Result<()>;

    /// Replace the repositories with those of `sources.list` lines.
    ///
    /// Nothing changes if any line is invalid. Returns the number of repositories.
    fn set_repositories(&mut self, lines: &[String]) -> Result<usize>;

    /// Replace the status table with the contents of a status file.
    fn load_status(&mut self, path: &Path) -> Result<usize>;

    /// Rebuild the catalog, downloading index lists first if `download` is set.
    fn refresh(
        &mut self,
        download: bool,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> RefreshReport;

    /// Names of every available package, sorted.
    fn available_package_names(&self) -> Vec<String>;

    /// The newest available version of a package.
    fn latest_binary(&self, name: &str) -> Result<Option<Arc<PackageRecord>>>;

    /// Every available version of a package.
    fn binary_versions(&self, name: &str) -> Vec<Arc<PackageRecord>>;

    /// A specific available version of a package.
    fn binary_version(&self, name: &str, version: &str) -> Result<Option<Arc<PackageRecord>>>;

    /// Mark a package and its missing dependencies for download.
    fn mark_package(&mut self, record: &PackageRecord) -> Result<Vec<String>>;

    /// Status of a package. `None` means not installed.
    fn package_status(&self, name: &str) -> Option<PackageStatus>;

    /// Installed or pending version of a package.
    fn package_version(&self, name: &str) -> Option<String>;

    /// Entries waiting to be downloaded.
    fn pending_downloads(&self) -> Vec<(String, Arc<PackageRecord>)>;

    /// Number and size of pending downloads.
    fn change_size(&self) -> ChangeSize;

    /// Download pending archives.
    fn apply_changes(&mut self, progress: &mut dyn FnMut(ProgressEvent)) -> ApplyReport;

    /// Write the status table to a profile status file.
    fn save_changes(&self, path: &Path) -> Result<()>;

    /// Drop pending downloads and/or installs. Returns the number dropped.
    fn cancel_changes(&mut self, downloads: bool, installs: bool) -> usize;

    /// Newest records of installed packages with a newer version available.
    fn upgrades(&self) -> Vec<Arc<PackageRecord>>;

    /// Install downloaded changes, then reload the system status file.
    fn install(
        &mut self,
        installer: &dyn Installer,
        system_status: &Path,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<InstallPlan>;
}

/// State of one offline profile.
pub struct Session {
    architecture: Architecture,
    repositories: Vec<Arc<RepositoryEntry>>,
    download_directory: PathBuf,
    catalog: Catalog,
    status: StatusTable,
    fetcher: Box<dyn Fetcher>,
    cancel: CancellationToken,
}

impl Session {
    /// Construct an empty session.
    pub fn new(
        architecture: Architecture,
        download_directory: impl Into<PathBuf>,
        fetcher: Box<dyn Fetcher>,
    ) -> Self {
        Self {
            architecture,
            repositories: vec![],
            download_directory: download_directory.into(),
            catalog: Catalog::default(),
            status: StatusTable::default(),
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Construct a session from a configuration.
    ///
    /// Repositories are resolved but neither the catalog nor the status table is
    /// loaded.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        #[cfg(feature = "http")]
        let fetcher = DefaultFetcher::new(crate::transport::http::HttpFetcher::with_proxy(
            config.proxy.as_ref(),
        )?);
        #[cfg(not(feature = "http"))]
        let fetcher = DefaultFetcher::new();

        let mut session = Self::new(
            config.architecture()?,
            &config.download_directory,
            Box::new(fetcher),
        );
        session.set_repositories(&config.source_lines()?)?;

        Ok(session)
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn repositories(&self) -> &[Arc<RepositoryEntry>] {
        &self.repositories
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn status(&self) -> &StatusTable {
        &self.status
    }

    /// A token that stops a running refresh or apply when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn lists_directory(&self) -> PathBuf {
        self.download_directory.join("lists")
    }

    pub fn packages_directory(&self) -> PathBuf {
        self.download_directory.join("packages")
    }

    /// Index lists of the configured repositories.
    pub fn index_lists(&self) -> Vec<IndexList> {
        index_lists(
            &self.repositories,
            self.architecture,
            &self.lists_directory(),
        )
    }

    /// Clear a cancellation that stopped the previous operation.
    fn reset_cancellation(&self) {
        self.cancel.reset();
    }
}

impl PackageBackend for Session {
    fn set_architecture(&mut self, architecture: &str) -> Result<()> {
        self.architecture = Architecture::parse(architecture)?;

        Ok(())
    }

    fn set_repositories(&mut self, lines: &[String]) -> Result<usize> {
        self.repositories = parse_sources_list(lines)?
            .into_iter()
            .map(Arc::new)
            .collect();

        Ok(self.repositories.len())
    }

    fn load_status(&mut self, path: &Path) -> Result<usize> {
        self.status.load_path(path)
    }

    fn refresh(
        &mut self,
        download: bool,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> RefreshReport {
        let lists = self.index_lists();
        let mut report = RefreshReport::default();

        if download {
            download_lists(
                self.fetcher.as_ref(),
                &lists,
                progress,
                &self.cancel,
                &mut report,
            );
        }

        if !report.cancelled {
            read_lists(&mut self.catalog, &lists, progress, &self.cancel, &mut report);
        }

        self.reset_cancellation();

        report
    }

    fn available_package_names(&self) -> Vec<String> {
        self.catalog
            .names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn latest_binary(&self, name: &str) -> Result<Option<Arc<PackageRecord>>> {
        self.catalog.latest(name)
    }

    fn binary_versions(&self, name: &str) -> Vec<Arc<PackageRecord>> {
        self.catalog.versions(name).to_vec()
    }

    fn binary_version(&self, name: &str, version: &str) -> Result<Option<Arc<PackageRecord>>> {
        Ok(self.catalog.exact(name, &PackageVersion::parse(version)?))
    }

    fn mark_package(&mut self, record: &PackageRecord) -> Result<Vec<String>> {
        Resolver::new(&self.catalog, &mut self.status).mark(record, false)
    }

    fn package_status(&self, name: &str) -> Option<PackageStatus> {
        self.status.status_of(name)
    }

    fn package_version(&self, name: &str) -> Option<String> {
        self.status.version_of(name).map(|s| s.to_string())
    }

    fn pending_downloads(&self) -> Vec<(String, Arc<PackageRecord>)> {
        ChangeSet::new(&self.catalog, &self.status).pending_downloads()
    }

    fn change_size(&self) -> ChangeSize {
        ChangeSet::new(&self.catalog, &self.status).change_size()
    }

    fn apply_changes(&mut self, progress: &mut dyn FnMut(ProgressEvent)) -> ApplyReport {
        let directory = self.packages_directory();

        let report = ChangeSet::new(&self.catalog, &mut self.status).apply(
            self.fetcher.as_ref(),
            &directory,
            progress,
            &self.cancel,
        );

        self.reset_cancellation();

        report
    }

    fn save_changes(&self, path: &Path) -> Result<()> {
        self.status.save_path(path)
    }

    fn cancel_changes(&mut self, downloads: bool, installs: bool) -> usize {
        ChangeSet::new(&self.catalog, &mut self.status).cancel(downloads, installs)
    }

    fn upgrades(&self) -> Vec<Arc<PackageRecord>> {
        Resolver::new(&self.catalog, &self.status).upgrades()
    }

    fn install(
        &mut self,
        installer: &dyn Installer,
        system_status: &Path,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<InstallPlan> {
        let plan = InstallPlan::new(
            &self.index_lists(),
            &self.packages_directory(),
            &ChangeSet::new(&self.catalog, &self.status),
        )?;

        if plan.is_empty() {
            warn!("nothing to install");
            return Ok(plan);
        }

        info!(
            "installing {} archives for {} packages",
            plan.archives.len(),
            plan.packages.len()
        );
        installer.install(&plan, progress)?;

        self.load_status(system_status)?;

        Ok(plan)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{error::OfflineAptError, transport::filesystem::FilesystemFetcher},
        std::io::Write,
    };

    const SYSTEM_STATUS: &str = include_str!("testdata/status");

    const APP: &[u8] = b"app archive";
    const LIBAPP: &[u8] = b"libapp archive";

    fn gzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
        encoder.write_all(data)?;
        Ok(encoder.finish().into_result()?)
    }

    /// Lay out a mirror and return its source line.
    fn mirror(root: &Path) -> Result<String> {
        let mirror = root.join("mirror");
        let lists = mirror.join("dists/bullseye/main/binary-amd64");
        std::fs::create_dir_all(&lists)?;
        std::fs::create_dir_all(mirror.join("pool/main/a/app"))?;
        std::fs::create_dir_all(mirror.join("pool/main/liba/libapp"))?;

        std::fs::write(mirror.join("pool/main/a/app/app_1.0-1_amd64.deb"), APP)?;
        std::fs::write(
            mirror.join("pool/main/liba/libapp/libapp1_1.2-1_amd64.deb"),
            LIBAPP,
        )?;

        let index = format!(
            "Package: app\n\
             Version: 1.0-1\n\
             Depends: libapp1 (>= 1.1), libc6 (>= 2.28)\n\
             Filename: pool/main/a/app/app_1.0-1_amd64.deb\n\
             Size: {}\n\
             Description: an application\n\
             \n\
             Package: libapp1\n\
             Version: 1.2-1\n\
             Pre-Depends: awk\n\
             Filename: pool/main/liba/libapp/libapp1_1.2-1_amd64.deb\n\
             Size: {}\n\
             \n\
             Package: libc6\n\
             Version: 2.31-13+deb11u6\n\
             Filename: pool/main/g/glibc/libc6_2.31-13+deb11u6_amd64.deb\n\
             Size: 2844496\n\
             \n\
             Package: tzdata\n\
             Version: 2021a-1+deb11u8\n\
             Filename: pool/main/t/tzdata/tzdata_2021a-1+deb11u8_all.deb\n\
             Size: 285720\n",
            APP.len(),
            LIBAPP.len()
        );
        std::fs::write(lists.join("Packages.gz"), gzip(index.as_bytes())?)?;

        let base = url::Url::from_file_path(&mirror).unwrap();

        Ok(format!("deb {} bullseye main", base))
    }

    fn session(root: &Path) -> Result<Session> {
        let line = mirror(root)?;

        let status = root.join("status");
        std::fs::write(&status, SYSTEM_STATUS)?;

        let mut session = Session::new(
            Architecture::Amd64,
            root.join("download"),
            Box::new(FilesystemFetcher::default()),
        );
        assert_eq!(session.set_repositories(&[line])?, 1);
        assert_eq!(session.load_status(&status)?, 4);

        let report = session.refresh(true, &mut |_| {});
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.packages, 4);

        Ok(session)
    }

    #[test]
    fn configuration_errors_leave_state() -> Result<()> {
        let td = tempfile::tempdir()?;
        let mut session = session(td.path())?;

        assert!(matches!(
            session.set_architecture("s390x"),
            Err(OfflineAptError::UnsupportedArchitecture(_))
        ));
        assert_eq!(session.architecture(), Architecture::Amd64);
        session.set_architecture("x86_64")?;
        assert_eq!(session.architecture(), Architecture::Amd64);

        assert!(matches!(
            session.set_repositories(&["deb".to_string()]),
            Err(OfflineAptError::InvalidRepository(_))
        ));
        assert_eq!(session.repositories().len(), 1);

        Ok(())
    }

    #[test]
    fn queries() -> Result<()> {
        let td = tempfile::tempdir()?;
        let session = session(td.path())?;

        assert_eq!(
            session.available_package_names(),
            vec!["app", "libapp1", "libc6", "tzdata"]
        );
        assert_eq!(
            session.latest_binary("app")?.unwrap().version_str(),
            Some("1.0-1")
        );
        assert_eq!(session.binary_versions("libc6").len(), 1);
        assert!(session.binary_versions("missing").is_empty());
        assert!(session.binary_version("app", "1.0-1")?.is_some());
        assert!(session.binary_version("app", "2.0")?.is_none());

        assert_eq!(session.package_status("awk"), Some(PackageStatus::Installed));
        assert_eq!(session.package_version("base"), Some("11.1+deb11u5".into()));
        assert_eq!(session.package_status("nano"), None);

        let upgrades = session.upgrades();
        assert_eq!(upgrades.len(), 1);
        assert_eq!(upgrades[0].package(), "libc6");

        Ok(())
    }

    #[test]
    fn mark_apply_save() -> Result<()> {
        let td = tempfile::tempdir()?;
        let mut session = session(td.path())?;

        let app = session.latest_binary("app")?.unwrap();
        assert_eq!(session.mark_package(&app)?, vec!["app", "libapp1"]);

        assert_eq!(
            session.package_status("libapp1"),
            Some(PackageStatus::DependencyToBeDownloaded)
        );
        // The installed libc6 satisfies app.
        assert_eq!(session.package_status("libc6"), Some(PackageStatus::Installed));

        assert_eq!(session.pending_downloads().len(), 2);
        let size = session.change_size();
        assert_eq!(size.count, 2);
        assert_eq!(size.total_bytes, (APP.len() + LIBAPP.len()) as u64);

        let mut events = vec![];
        let report = session.apply_changes(&mut |e| events.push(e));
        assert!(report.is_complete());
        assert_eq!(report.downloaded.len(), 2);
        assert_eq!(events.last(), Some(&ProgressEvent::Finished));

        assert_eq!(session.package_status("app"), Some(PackageStatus::ToBeInstalled));
        assert_eq!(
            session.package_status("libapp1"),
            Some(PackageStatus::DependencyToBeInstalled)
        );
        assert!(session
            .packages_directory()
            .join("app_1.0-1_amd64.deb")
            .exists());

        let profile = td.path().join("profile/status");
        session.save_changes(&profile)?;

        let mut reloaded = Session::new(
            Architecture::Amd64,
            td.path().join("download"),
            Box::new(FilesystemFetcher::default()),
        );
        reloaded.load_status(&profile)?;
        assert_eq!(
            reloaded.package_status("app"),
            Some(PackageStatus::ToBeInstalled)
        );
        assert_eq!(reloaded.package_version("libapp1"), Some("1.2-1".into()));

        assert_eq!(session.cancel_changes(false, true), 2);
        assert_eq!(session.package_status("app"), None);

        Ok(())
    }

    #[test]
    fn refresh_cancelled() -> Result<()> {
        let td = tempfile::tempdir()?;
        let mut session = session(td.path())?;

        session.cancellation_token().cancel();
        let report = session.refresh(false, &mut |_| {});
        assert!(report.cancelled);
        assert_eq!(report.lists_read, 0);

        // The cancellation only applies to the operation it stopped.
        let report = session.refresh(false, &mut |_| {});
        assert!(!report.cancelled);
        assert_eq!(report.lists_read, 1);

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn install_reloads_system_status() -> Result<()> {
        let td = tempfile::tempdir()?;
        let mut session = session(td.path())?;

        let app = session.latest_binary("app")?.unwrap();
        session.mark_package(&app)?;
        session.apply_changes(&mut |_| {});

        let system = td.path().join("system");
        std::fs::create_dir_all(system.join("lists"))?;
        std::fs::create_dir_all(system.join("archives"))?;

        let installed = format!(
            "{}\nPackage: app\nStatus: install ok installed\nVersion: 1.0-1\n",
            SYSTEM_STATUS
        );
        let system_status = system.join("status");
        std::fs::write(&system_status, installed)?;

        let installer =
            crate::install::ElevatedCommandInstaller::new("env", td.path().join("staging"))
                .with_system_directories(system.join("lists"), system.join("archives"))
                .with_apt_programs("true", "true");

        let plan = session.install(&installer, &system_status, &mut |_| {})?;
        assert_eq!(plan.packages, vec!["app".to_string()]);
        assert_eq!(plan.archives.len(), 2);

        assert_eq!(session.package_status("app"), Some(PackageStatus::Installed));
        assert_eq!(session.package_status("libapp1"), None);
        assert!(system.join("archives/libapp1_1.2-1_amd64.deb").exists());

        Ok(())
    }
}
