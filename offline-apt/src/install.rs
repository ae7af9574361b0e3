// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Installing staged changes on the offline machine.

Installation hands the cached lists and archives to the system package manager
instead of editing its sources: lists are copied, decompressed, into the APT
lists directory, archives into the APT archive cache, and then `apt-get install`
is run for the packages the user asked for. Dependencies are left for APT to
pick from the archive cache.
*/

use {
    crate::{
        changes::{archive_path, ChangeSet},
        error::{OfflineAptError, Result},
        io::{read_decompressed, Compression},
        lists::IndexList,
        package_record::PackageStatus,
        progress::ProgressEvent,
        sources::url_to_filename,
        status::StatusTable,
    },
    duct::cmd,
    log::{info, warn},
    std::{
        ffi::OsString,
        io::{BufRead, BufReader},
        ops::Deref,
        path::{Path, PathBuf},
    },
};

/// Directory APT reads index lists from.
pub const APT_LISTS_DIRECTORY: &str = "/var/lib/apt/lists";

/// Directory APT caches package archives in.
pub const APT_ARCHIVES_DIRECTORY: &str = "/var/cache/apt/archives";

/// A cached index list and the filename APT expects for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListInstall {
    pub source: PathBuf,
    pub compression: Compression,
    pub target_name: String,
}

/// Everything needed to install the pending changes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstallPlan {
    /// Index lists to place in the APT lists directory.
    pub lists: Vec<ListInstall>,
    /// Downloaded archives to place in the APT archive cache.
    pub archives: Vec<PathBuf>,
    /// Packages to pass to `apt-get install`.
    pub packages: Vec<String>,
}

impl InstallPlan {
    /// Build a plan from the cached lists and the pending installs of a change set.
    ///
    /// Only packages the user marked are installed explicitly. Archives of
    /// dependencies are staged but left for APT to select.
    pub fn new<S: Deref<Target = StatusTable>>(
        lists: &[IndexList],
        packages_directory: &Path,
        changes: &ChangeSet<'_, S>,
    ) -> Result<Self> {
        let lists = lists
            .iter()
            .filter(|list| list.path.exists())
            .map(|list| {
                let uncompressed = list
                    .url
                    .strip_suffix(Compression::Gzip.extension())
                    .unwrap_or(&list.url);
                let target = url_to_filename(Path::new(""), uncompressed);

                ListInstall {
                    source: list.path.clone(),
                    compression: Compression::from_path(&list.path),
                    target_name: target.to_string_lossy().to_string(),
                }
            })
            .collect::<Vec<_>>();

        let mut archives = vec![];
        let mut packages = vec![];

        for (name, record) in changes.pending_installs() {
            let path = archive_path(packages_directory, &record)?;

            if !path.exists() {
                warn!("archive for {} is missing: {}", name, path.display());
                continue;
            }

            archives.push(path);

            if record.package() == name
                && changes.status_of(&name) == Some(PackageStatus::ToBeInstalled)
            {
                packages.push(name);
            }
        }

        Ok(Self {
            lists,
            archives,
            packages,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty() && self.packages.is_empty()
    }
}

/// Something able to carry out an [InstallPlan].
pub trait Installer {
    fn install(&self, plan: &InstallPlan, progress: &mut dyn FnMut(ProgressEvent)) -> Result<()>;
}

/// Installs by running the copy and APT commands through an elevation helper
/// such as `sudo` or `pkexec`.
#[derive(Clone, Debug)]
pub struct ElevatedCommandInstaller {
    elevate: String,
    staging_directory: PathBuf,
    lists_directory: PathBuf,
    archives_directory: PathBuf,
    apt_cache: String,
    apt_get: String,
}

impl ElevatedCommandInstaller {
    /// Construct an instance using an elevation helper.
    ///
    /// Lists are decompressed into `staging_directory` before they are copied.
    pub fn new(elevate: impl ToString, staging_directory: impl AsRef<Path>) -> Self {
        Self {
            elevate: elevate.to_string(),
            staging_directory: staging_directory.as_ref().to_path_buf(),
            lists_directory: PathBuf::from(APT_LISTS_DIRECTORY),
            archives_directory: PathBuf::from(APT_ARCHIVES_DIRECTORY),
            apt_cache: "apt-cache".to_string(),
            apt_get: "apt-get".to_string(),
        }
    }

    /// Set the directories lists and archives are copied into.
    pub fn with_system_directories(
        mut self,
        lists: impl AsRef<Path>,
        archives: impl AsRef<Path>,
    ) -> Self {
        self.lists_directory = lists.as_ref().to_path_buf();
        self.archives_directory = archives.as_ref().to_path_buf();
        self
    }

    /// Set the programs run in place of `apt-cache` and `apt-get`.
    pub fn with_apt_programs(mut self, apt_cache: impl ToString, apt_get: impl ToString) -> Self {
        self.apt_cache = apt_cache.to_string();
        self.apt_get = apt_get.to_string();
        self
    }

    fn stage_lists(&self, plan: &InstallPlan) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.staging_directory).map_err(|e| {
            OfflineAptError::IoPath(format!("{}", self.staging_directory.display()), e)
        })?;

        let mut staged = vec![];

        for list in &plan.lists {
            let dest = self.staging_directory.join(&list.target_name);

            let fh = std::fs::File::open(&list.source)
                .map_err(|e| OfflineAptError::IoPath(format!("{}", list.source.display()), e))?;
            let mut reader = read_decompressed(fh, list.compression)?;
            let mut writer = std::fs::File::create(&dest)
                .map_err(|e| OfflineAptError::IoPath(format!("{}", dest.display()), e))?;
            std::io::copy(&mut reader, &mut writer)?;

            staged.push(dest);
        }

        Ok(staged)
    }

    fn run(&self, args: Vec<OsString>, progress: &mut dyn FnMut(ProgressEvent)) -> Result<()> {
        let description = format!(
            "{} {}",
            self.elevate,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        info!("{}", description);
        progress(ProgressEvent::Command {
            command: description.clone(),
        });

        let command = cmd(self.elevate.as_str(), &args)
            .stderr_to_stdout()
            .unchecked()
            .reader()
            .map_err(|e| OfflineAptError::InstallCommand(description.clone(), e.to_string()))?;
        {
            let reader = BufReader::new(&command);
            for line in reader.lines() {
                info!("{}", line?);
            }
        }

        let output = command.try_wait()?.ok_or_else(|| {
            OfflineAptError::InstallCommand(
                description.clone(),
                "unable to wait on command".to_string(),
            )
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(OfflineAptError::InstallCommand(
                description,
                output.status.to_string(),
            ))
        }
    }
}

impl Installer for ElevatedCommandInstaller {
    fn install(&self, plan: &InstallPlan, progress: &mut dyn FnMut(ProgressEvent)) -> Result<()> {
        let staged = self.stage_lists(plan)?;

        if !staged.is_empty() {
            let mut args: Vec<OsString> = vec!["cp".into()];
            args.extend(staged.into_iter().map(|p| p.into_os_string()));
            args.push(self.lists_directory.clone().into_os_string());
            self.run(args, progress)?;
        }

        if !plan.archives.is_empty() {
            let mut args: Vec<OsString> = vec!["cp".into()];
            args.extend(plan.archives.iter().map(|p| p.clone().into_os_string()));
            args.push(self.archives_directory.clone().into_os_string());
            self.run(args, progress)?;
        }

        self.run(vec![(&self.apt_cache).into(), "gencaches".into()], progress)?;

        if !plan.packages.is_empty() {
            let mut args: Vec<OsString> =
                vec![(&self.apt_get).into(), "install".into(), "-y".into()];
            args.extend(plan.packages.iter().map(OsString::from));
            self.run(args, progress)?;
        }

        progress(ProgressEvent::Finished);

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            catalog::Catalog,
            sources::{Architecture, RepositoryEntry},
            status::StatusTable,
        },
        indoc::indoc,
        std::{io::Write, sync::Arc},
    };

    struct Fixture {
        _td: tempfile::TempDir,
        root: PathBuf,
        lists: Vec<IndexList>,
        catalog: Catalog,
        status: StatusTable,
    }

    fn fixture() -> Result<Fixture> {
        let td = tempfile::tempdir()?;
        let root = td.path().to_path_buf();

        let repository = Arc::new(RepositoryEntry::new(
            "http://example.com/debian",
            "stable",
            "main",
        )?);
        let lists = crate::lists::index_lists(
            &[repository.clone()],
            Architecture::Amd64,
            &root.join("lists"),
        );

        let index = indoc! {"
            Package: app
            Version: 1.0
            Filename: pool/main/a/app/app_1.0_amd64.deb

            Package: libapp
            Version: 1.0
            Filename: pool/main/liba/libapp/libapp_1.0_amd64.deb

            Package: pending
            Version: 1.0
            Filename: pool/main/p/pending/pending_1.0_amd64.deb
        "};

        std::fs::create_dir_all(root.join("lists"))?;
        let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
        encoder.write_all(index.as_bytes())?;
        std::fs::write(&lists[0].path, encoder.finish().into_result()?)?;

        std::fs::create_dir_all(root.join("packages"))?;
        std::fs::write(root.join("packages/app_1.0_amd64.deb"), b"app")?;
        std::fs::write(root.join("packages/libapp_1.0_amd64.deb"), b"libapp")?;

        let mut catalog = Catalog::default();
        catalog.ingest(&repository, std::io::Cursor::new(index.as_bytes()))?;

        let mut status = StatusTable::default();
        status.load(std::io::Cursor::new(
            indoc! {"
                Package: app
                Status: to be installed
                Version: 1.0

                Package: libapp
                Status: dependency to be installed
                Version: 1.0

                Package: pending
                Status: to be downloaded
                Version: 1.0
            "}
            .as_bytes(),
        ))?;

        Ok(Fixture {
            _td: td,
            root,
            lists,
            catalog,
            status,
        })
    }

    #[test]
    fn plan() -> Result<()> {
        let f = fixture()?;
        let changes = ChangeSet::new(&f.catalog, &f.status);
        let plan = InstallPlan::new(&f.lists, &f.root.join("packages"), &changes)?;

        assert_eq!(plan.lists.len(), 1);
        assert_eq!(
            plan.lists[0].target_name,
            "example.com_debian_dists_stable_main_binary-amd64_Packages"
        );
        assert_eq!(plan.lists[0].compression, Compression::Gzip);
        assert_eq!(plan.archives.len(), 2);
        assert_eq!(plan.packages, vec!["app".to_string()]);
        assert!(!plan.is_empty());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn install_with_stand_in_commands() -> Result<()> {
        let f = fixture()?;
        let changes = ChangeSet::new(&f.catalog, &f.status);
        let plan = InstallPlan::new(&f.lists, &f.root.join("packages"), &changes)?;

        let system_lists = f.root.join("system/lists");
        let system_archives = f.root.join("system/archives");
        std::fs::create_dir_all(&system_lists)?;
        std::fs::create_dir_all(&system_archives)?;

        let installer = ElevatedCommandInstaller::new("env", f.root.join("staging"))
            .with_system_directories(&system_lists, &system_archives)
            .with_apt_programs("true", "true");

        let mut commands = vec![];
        installer.install(&plan, &mut |e| {
            if let ProgressEvent::Command { command } = e {
                commands.push(command);
            }
        })?;

        assert_eq!(commands.len(), 4);
        assert!(commands[3].starts_with("env true install -y app"));

        let staged = std::fs::read_to_string(
            system_lists.join("example.com_debian_dists_stable_main_binary-amd64_Packages"),
        )?;
        assert!(staged.starts_with("Package: app\n"));
        assert!(system_archives.join("libapp_1.0_amd64.deb").exists());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_command() -> Result<()> {
        let installer = ElevatedCommandInstaller::new("env", "/nonexistent")
            .with_apt_programs("false", "false");

        let res = installer.run(vec!["false".into()], &mut |_| {});
        assert!(matches!(res, Err(OfflineAptError::InstallCommand(..))));

        Ok(())
    }
}
