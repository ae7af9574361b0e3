// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Local install and pending-change status.

The status table holds one record per package in a recognized [PackageStatus].
Names a package provides alias the same record: records live in an arena keyed
by id and every name maps to an id, so a status change made through any alias is
seen through all of them.

The table reads the dpkg status format and writes the same format restricted to
the `Package`, `Status`, `Version` and `Provides` fields.
*/

use {
    crate::{
        control::StanzaReader,
        error::{OfflineAptError, Result},
        package_record::{PackageRecord, PackageStatus},
    },
    log::{debug, info},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        io::{BufRead, BufReader, Write},
        path::Path,
    },
};

/// Default location of the system status file.
pub const DEFAULT_STATUS_PATH: &str = "/var/lib/dpkg/status";

type RecordId = usize;

/// Installed and pending packages, by name and provided name.
#[derive(Clone, Debug, Default)]
pub struct StatusTable {
    records: BTreeMap<RecordId, PackageRecord>,
    names: HashMap<String, RecordId>,
    next_id: RecordId,
}

impl StatusTable {
    /// Remove all entries.
    pub fn clear(&mut self) {
        self.records.clear();
        self.names.clear();
        self.next_id = 0;
    }

    /// Rebuild the table from a status stream.
    ///
    /// Stanzas without a `Package` field or without a recognized `Status` are
    /// dropped. Returns the number of records loaded.
    pub fn load(&mut self, reader: impl BufRead) -> Result<usize> {
        self.clear();

        for paragraph in StanzaReader::status(reader) {
            let record = match PackageRecord::try_from(paragraph?) {
                Ok(record) => record,
                Err(_) => continue,
            };

            if record.status().is_none() {
                debug!(
                    "ignoring {} with status {:?}",
                    record.package(),
                    record.field_str("Status")
                );
                continue;
            }

            let id = self.allocate(record);
            let record = &self.records[&id];

            // A package's own name wins over another package providing it.
            let provided = record
                .provided_names()
                .map(|s| s.to_string())
                .collect::<Vec<_>>();
            self.names.insert(record.package().to_string(), id);

            for name in provided {
                self.names.entry(name).or_insert(id);
            }
        }

        self.collect_garbage();

        info!("{} packages installed", self.len());

        Ok(self.len())
    }

    /// Rebuild the table from a status file.
    pub fn load_path(&mut self, path: &Path) -> Result<usize> {
        let fh = std::fs::File::open(path)
            .map_err(|e| OfflineAptError::IoPath(format!("{}", path.display()), e))?;

        self.load(BufReader::new(fh))
    }

    fn allocate(&mut self, record: PackageRecord) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, record);
        id
    }

    /// Drop records no name refers to any more.
    fn collect_garbage(&mut self) {
        let live = self.names.values().copied().collect::<HashSet<_>>();
        self.records.retain(|id, _| live.contains(id));
    }

    /// Write a record under its package name.
    ///
    /// An existing record of the same package is replaced in place, so aliases it
    /// still provides follow. Provided names are aliased only if nothing else
    /// claims them.
    pub fn insert(&mut self, record: PackageRecord) {
        let name = record.package().to_string();
        let provided = record
            .provided_names()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();

        let id = match self.names.get(&name).copied() {
            Some(id) if self.records[&id].package() == name => {
                if let Some(previous) = self.records.insert(id, record) {
                    for alias in previous.provided_names() {
                        if alias != name
                            && !provided.iter().any(|p| p.as_str() == alias)
                            && self.names.get(alias) == Some(&id)
                        {
                            debug!("{} no longer provides {}", name, alias);
                            self.names.remove(alias);
                        }
                    }
                }
                id
            }
            _ => {
                let id = self.allocate(record);
                self.names.insert(name, id);
                id
            }
        };

        for alias in provided {
            self.names.entry(alias).or_insert(id);
        }

        self.collect_garbage();
    }

    /// The record known under a name.
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.names.get(name).and_then(|id| self.records.get(id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// The status of the record known under a name. `None` means not installed.
    pub fn status_of(&self, name: &str) -> Option<PackageStatus> {
        self.get(name).and_then(|r| r.status())
    }

    /// The version of the record known under a name.
    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|r| r.version_str())
    }

    /// Change the status of the record known under a name.
    ///
    /// Returns whether the name was found.
    pub fn set_status(&mut self, name: &str, status: PackageStatus) -> bool {
        match self.names.get(name).and_then(|id| self.records.get_mut(id)) {
            Some(record) => {
                record.set_status(status);
                true
            }
            None => false,
        }
    }

    /// Keep only records for which the predicate holds, along with their aliases.
    ///
    /// Returns the number of records removed.
    pub fn retain(&mut self, mut predicate: impl FnMut(&PackageRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| predicate(record));

        let records = &self.records;
        self.names.retain(|_, id| records.contains_key(id));

        before - self.records.len()
    }

    /// Distinct records, in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records.values()
    }

    /// Every name in the table, including provided aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(|s| s.as_str())
    }

    /// Number of distinct records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize every distinct record as a status stanza.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        for record in self.records.values() {
            record.write_status_stanza(writer)?;
            writer.write_all(b"\n")?;
        }

        Ok(())
    }

    /// Write the table to a status file, replacing it.
    pub fn save_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OfflineAptError::IoPath(format!("{}", parent.display()), e))?;
        }

        let mut fh = std::io::BufWriter::new(
            std::fs::File::create(path)
                .map_err(|e| OfflineAptError::IoPath(format!("{}", path.display()), e))?,
        );
        self.save(&mut fh)?;
        fh.flush()?;

        Ok(())
    }
}
