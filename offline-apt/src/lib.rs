// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Stage APT package installs for machines without network access.

This crate implements the metadata engine of an offline package transfer workflow.
A machine with network access downloads the APT index lists and package archives an
offline machine needs. The offline machine then hands them to its own package manager.
The two machines exchange a *profile*: a dpkg-style status file recording what is
installed on the offline machine and what is pending.

# A Tour of Functionality

The [package_version] module implements Debian version string parsing and ordering.
[package_version::PackageVersion] is the main type.

Control files, the RFC 822-like *stanza* format shared by `Packages` indices and
the dpkg status file, are parsed by the [control] module. [control::StanzaReader]
streams [control::ControlParagraph] from any [std::io::BufRead].
[package_record::PackageRecord] wraps a paragraph with typed accessors.
The [dependency] module parses dependency expressions like
`libc6 (>= 2.4), libfoo | libfoo-compat`.

[sources::RepositoryEntry] represents one section of a `deb` line in a
`sources.list`. The [lists] module fetches their `Packages.gz` indices through a
[transport::Fetcher] and reads them into a [catalog::Catalog] holding every known
version of every package.

[status::StatusTable] holds installed and pending packages. Names a package
*provides* alias the same entry.

[resolver::Resolver] marks packages for download, walking dependencies depth first
and marking the first alternative of every unsatisfied expression. It does not
backtrack and does not detect conflicts.

[changes::ChangeSet] sizes, downloads and cancels pending changes.
[install::InstallPlan] and [install::Installer] install the downloaded changes on
the offline machine.

[session::Session] ties all of the above together and implements the
[session::PackageBackend] interface front ends drive.

# Crate Features

The optional and enabled-by-default `http` feature enables fetching over HTTP via
[reqwest]. Without it, only `file://` repositories can be fetched.
*/

pub mod catalog;
pub mod changes;
pub mod config;
pub mod control;
pub mod dependency;
pub mod error;
pub mod install;
pub mod io;
pub mod lists;
pub mod package_record;
pub mod package_version;
pub mod progress;
pub mod resolver;
pub mod session;
pub mod sources;
pub mod status;
pub mod transport;
