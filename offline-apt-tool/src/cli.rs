// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::{error, warn, LevelFilter},
    offline_apt::{
        config::SessionConfig,
        error::OfflineAptError,
        install::ElevatedCommandInstaller,
        progress::ProgressEvent,
        session::{PackageBackend, Session},
        status::DEFAULT_STATUS_PATH,
    },
    std::{
        ffi::OsStr,
        io::Stdout,
        path::{Path, PathBuf},
    },
    thiserror::Error,
};

const CONFIG_ABOUT: &str = "\
# YAML Configuration

Every command reads a YAML file describing one offline profile: the machine
packages are being gathered for. It can have the following keys:

architecture (required) (string)
   Architecture of the offline machine. One of `amd64`, `armel`, `i386`,
   `ia64`, `powerpc` or `sparc`. `x86_64` is accepted as `amd64`.

sources (optional) (list[string])
   Lines in `sources.list` syntax, e.g.
   `deb http://deb.debian.org/debian bullseye main contrib`.

   `deb-src` lines and comments are ignored.

sources_file (optional) (string)
   Path to a `sources.list` file. Its lines are appended to `sources`.
   Typically a copy of the offline machine's `/etc/apt/sources.list`.

download_directory (required) (string)
   Directory to store index lists (`lists/`) and package archives
   (`packages/`) in.

status_file (optional) (string)
   Path to the profile status file. Start from a copy of the offline
   machine's `/var/lib/dpkg/status`. Commands changing the profile write it
   back here.

   If not defined, the local `/var/lib/dpkg/status` is read and the profile
   can't be changed.

proxy (optional) (mapping)
   HTTP proxy to use, with keys `url`, `username` and `password`. Proxies
   defined by `http_proxy` and `https_proxy` environment variables are
   always honored.
";

const INSTALL_ABOUT: &str = "\
Install downloaded packages on the offline machine.

Cached index lists are decompressed into `/var/lib/apt/lists` and downloaded
archives are copied into `/var/cache/apt/archives`. Then `apt-get install` is
run for the packages that were marked explicitly. Dependencies are installed
by APT from the archive cache.

Commands needing root are run through the helper given by `--elevate`, such
as `sudo` or `pkexec`. Afterwards the system status file is read back into
the profile.
";

#[derive(Debug, Error)]
pub enum OatError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    OfflineApt(#[from] OfflineAptError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("--config is required")]
    MissingConfig,

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("package not found in any package list: {0}")]
    UnknownPackage(String),

    #[error("no status_file is configured; refusing to change the system status file")]
    NoProfile,

    #[error("{0} items failed")]
    Incomplete(usize),
}

pub type Result<T> = std::result::Result<T, OatError>;

pub fn run_cli() -> Result<()> {
    let app = Command::new("Offline APT Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Stage APT package installs for machines without network access")
        .after_long_help(CONFIG_ABOUT)
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML file defining the offline profile (required)"),
        )
        .arg(
            Arg::new("status")
                .long("status")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to the profile status file, overriding the configuration"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("update")
            .about("Download index lists and read them")
            .arg(
                Arg::new("no-download")
                    .long("no-download")
                    .help("Only read index lists already in the cache"),
            ),
    );

    let app = app.subcommand(
        Command::new("show")
            .about("Print available versions and the status of a package")
            .arg(Arg::new("name").required(true).help("Name of package")),
    );

    let app = app.subcommand(
        Command::new("mark")
            .about("Mark packages and their dependencies for download")
            .long_about(
                "Mark packages and their dependencies for download.\n\nEach name is marked on its own: a name that fails is reported and the others are still saved to the profile.",
            )
            .arg(
                Arg::new("name")
                    .required(true)
                    .multiple_values(true)
                    .help("Names of packages to mark"),
            ),
    );

    let app = app.subcommand(
        Command::new("upgrades")
            .about("Print installed packages with newer versions available")
            .arg(
                Arg::new("mark")
                    .long("mark")
                    .help("Mark every upgrade for download"),
            ),
    );

    let app = app.subcommand(Command::new("changes").about("Print pending downloads"));

    let app = app.subcommand(Command::new("download").about("Download pending packages"));

    let app = app.subcommand(
        Command::new("cancel")
            .about("Drop pending changes")
            .long_about(
                "Drop pending changes.\n\nWithout flags, both pending downloads and pending installs are dropped.",
            )
            .arg(
                Arg::new("downloads")
                    .long("downloads")
                    .help("Drop packages waiting to be downloaded"),
            )
            .arg(
                Arg::new("installs")
                    .long("installs")
                    .help("Drop packages waiting to be installed"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("install")
            .about("Install downloaded packages on the offline machine")
            .long_about(INSTALL_ABOUT)
            .arg(
                Arg::new("elevate")
                    .long("elevate")
                    .takes_value(true)
                    .required(true)
                    .help("Program running a command as root, e.g. sudo or pkexec"),
            )
            .arg(
                Arg::new("system-status")
                    .long("system-status")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .default_value(DEFAULT_STATUS_PATH)
                    .help("System status file to read after installing"),
            ),
    );

    let matches = app.clone().get_matches();

    // -v may be given before or after the sub-command.
    let verbosity = matches.occurrences_of("verbose").max(
        matches
            .subcommand()
            .map(|(_, args)| args.occurrences_of("verbose"))
            .unwrap_or(0),
    );

    let log_level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("update", args)) => command_update(args),
        Some(("show", args)) => command_show(args),
        Some(("mark", args)) => command_mark(args),
        Some(("upgrades", args)) => command_upgrades(args),
        Some(("changes", args)) => command_changes(args),
        Some(("download", args)) => command_download(args),
        Some(("cancel", args)) => command_cancel(args),
        Some(("install", args)) => command_install(args),
        Some((command, _)) => Err(OatError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

/// Read a profile configuration, applying a status file override.
fn load_config(path: &Path, status: Option<&OsStr>) -> Result<SessionConfig> {
    let f = std::fs::File::open(path)?;
    let mut config: SessionConfig = serde_yaml::from_reader(f)?;

    if let Some(status) = status {
        config.status_file = Some(PathBuf::from(status));
    }

    Ok(config)
}

/// Profile state shared by every command.
struct Profile {
    config: SessionConfig,
    session: Session,
}

impl Profile {
    fn open(args: &ArgMatches) -> Result<Self> {
        let config_path = args
            .value_of_os("config")
            .ok_or(OatError::MissingConfig)?;

        let config = load_config(Path::new(config_path), args.value_of_os("status"))?;
        let session = Session::from_config(&config)?;

        Ok(Self { config, session })
    }

    /// Open the profile with its status table and the cached catalog loaded.
    fn load(args: &ArgMatches) -> Result<Self> {
        let mut profile = Self::open(args)?;

        profile
            .session
            .load_status(&profile.config.status_path())?;
        let report = profile.session.refresh(false, &mut |_| {});

        if report.lists_read == 0 {
            warn!("no package lists in the cache; run `oat update` first");
        }

        Ok(profile)
    }

    fn save(&self) -> Result<()> {
        let path = self.config.status_file.as_ref().ok_or(OatError::NoProfile)?;
        self.session.save_changes(path)?;
        println!("profile written to {}", path.display());

        Ok(())
    }
}

fn print_event(event: ProgressEvent) {
    match event {
        ProgressEvent::ListDownload { .. } | ProgressEvent::PackageDownload { .. } => {}
        ProgressEvent::ListRead { percent, .. } if percent < 100 => {}
        event => println!("{}", event),
    }
}

fn command_update(args: &ArgMatches) -> Result<()> {
    let mut profile = Profile::open(args)?;

    let report = profile
        .session
        .refresh(!args.is_present("no-download"), &mut print_event);

    for url in &report.missing {
        println!("not found: {}", url);
    }
    for (url, error) in &report.failed {
        println!("failed: {}: {}", url, error);
    }
    for path in &report.corrupt {
        println!("corrupt, deleted: {}", path.display());
    }

    println!("{} packages available", report.packages);

    match report.failed.len() + report.corrupt.len() {
        0 => Ok(()),
        failed => Err(OatError::Incomplete(failed)),
    }
}

fn command_show(args: &ArgMatches) -> Result<()> {
    let profile = Profile::load(args)?;
    let name = args.value_of("name").expect("name argument is required");

    let versions = profile.session.binary_versions(name);
    if versions.is_empty() {
        return Err(OatError::UnknownPackage(name.to_string()));
    }

    println!("{}:", name);
    for record in versions {
        println!(
            "  {} {} ({} bytes) from {}",
            record.package(),
            record.version_str().unwrap_or("?"),
            record.size().and_then(|s| s.ok()).unwrap_or(0),
            record
                .repository()
                .map(|r| r.label())
                .unwrap_or_else(|| "unknown repository".to_string())
        );
    }

    let status = profile
        .session
        .package_status(name)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "not installed".to_string());

    match profile.session.package_version(name) {
        Some(version) => println!("status: {} ({})", status, version),
        None => println!("status: {}", status),
    }

    Ok(())
}

/// Mark the newest version of a package, tolerating packages that are up to date.
fn mark(session: &mut Session, name: &str) -> Result<()> {
    let record = session
        .latest_binary(name)?
        .ok_or_else(|| OatError::UnknownPackage(name.to_string()))?;

    match session.mark_package(&record) {
        Ok(marked) => {
            println!("marked {}", marked.join(", "));
            Ok(())
        }
        Err(OfflineAptError::AlreadySatisfied(name, status)) => {
            println!("{} is already {}", name, status);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Mark every name, reporting failures. Returns the number of names that failed.
fn mark_each<'a>(session: &mut Session, names: impl Iterator<Item = &'a str>) -> usize {
    let mut failed = 0;

    for name in names {
        if let Err(e) = mark(session, name) {
            error!("unable to mark {}: {}", name, e);
            failed += 1;
        }
    }

    failed
}

fn command_mark(args: &ArgMatches) -> Result<()> {
    let mut profile = Profile::load(args)?;

    let failed = mark_each(
        &mut profile.session,
        args.values_of("name").expect("name argument is required"),
    );
    profile.save()?;

    if failed > 0 {
        Err(OatError::Incomplete(failed))
    } else {
        Ok(())
    }
}

fn command_upgrades(args: &ArgMatches) -> Result<()> {
    let mut profile = Profile::load(args)?;
    let upgrades = profile.session.upgrades();

    for record in &upgrades {
        println!(
            "{} {} -> {}",
            record.package(),
            profile
                .session
                .package_version(record.package())
                .unwrap_or_default(),
            record.version_str().unwrap_or("?")
        );
    }

    println!("{} upgrades available", upgrades.len());

    if args.is_present("mark") && !upgrades.is_empty() {
        let failed = mark_each(&mut profile.session, upgrades.iter().map(|r| r.package()));
        profile.save()?;

        if failed > 0 {
            return Err(OatError::Incomplete(failed));
        }
    }

    Ok(())
}

fn command_changes(args: &ArgMatches) -> Result<()> {
    let profile = Profile::load(args)?;

    for (name, record) in profile.session.pending_downloads() {
        println!(
            "{} {} ({})",
            name,
            record.version_str().unwrap_or("?"),
            profile
                .session
                .package_status(&name)
                .map(|s| s.to_string())
                .unwrap_or_default()
        );
    }

    let size = profile.session.change_size();
    println!("{} packages, {}B to download", size.count, size.human);

    Ok(())
}

fn command_download(args: &ArgMatches) -> Result<()> {
    let mut profile = Profile::load(args)?;

    let mut bar: Option<(String, pbr::ProgressBar<Stdout>)> = None;

    let report = profile.session.apply_changes(&mut |event| match event {
        ProgressEvent::PackageDownload {
            name,
            downloaded,
            total,
        } => {
            if bar.as_ref().map(|(current, _)| current != &name).unwrap_or(true) {
                if let Some((_, mut previous)) = bar.take() {
                    previous.finish();
                }

                let mut pb = pbr::ProgressBar::new(total.unwrap_or(0));
                pb.set_units(pbr::Units::Bytes);
                pb.message(&format!("{} ", name));
                bar = Some((name, pb));
            }

            if let Some((_, pb)) = bar.as_mut() {
                pb.set(downloaded);
            }
        }
        ProgressEvent::Finished => {
            if let Some((_, mut pb)) = bar.take() {
                pb.finish();
            }
        }
        event => println!("{}", event),
    });

    for (name, error) in &report.failed {
        println!("failed: {}: {}", name, error);
    }

    println!(
        "{} downloaded, {} already present, {} failed",
        report.downloaded.len(),
        report.hits.len(),
        report.failed.len()
    );

    profile.save()?;

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(OatError::Incomplete(report.failed.len()))
    }
}

fn command_cancel(args: &ArgMatches) -> Result<()> {
    let mut profile = Profile::load(args)?;

    let (downloads, installs) = match (args.is_present("downloads"), args.is_present("installs")) {
        (false, false) => (true, true),
        flags => flags,
    };

    let removed = profile.session.cancel_changes(downloads, installs);
    println!("{} pending changes dropped", removed);

    profile.save()
}

fn command_install(args: &ArgMatches) -> Result<()> {
    let mut profile = Profile::load(args)?;

    let elevate = args
        .value_of("elevate")
        .expect("elevate argument is required");
    let system_status = args
        .value_of_os("system-status")
        .expect("system-status argument has a default");

    let installer = ElevatedCommandInstaller::new(
        elevate,
        profile.config.download_directory.join("staging"),
    );

    let plan = profile
        .session
        .install(&installer, Path::new(system_status), &mut print_event)?;

    if plan.is_empty() {
        println!("nothing to install");
        return Ok(());
    }

    println!("installed {}", plan.packages.join(", "));

    if profile.config.status_file.is_some() {
        profile.save()?;
    }

    Ok(())
}
