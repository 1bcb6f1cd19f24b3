//! Repair of a multi-locality-group database whose descriptors were lost.
//!
//! The descriptor contents are recovered from the files that survive:
//! 1. Every table in every locality group is scanned to compute its key
//!    range and largest sequence number.
//! 2. Write-ahead logs are replayed in file-number order; batches already
//!    reflected in a surviving table are dropped, the rest are split per
//!    locality group and flushed to new level-0 tables.
//! 3. Each locality group gets a fresh descriptor: log number zero, next
//!    file number past every observed file, last sequence from its tables,
//!    every table at level 0, compaction pointers cleared.
//!
//! Every step tolerates partial failure: corrupt records and unscannable
//! tables are logged and quarantined under `lost/` rather than aborting the
//! run.

mod lg;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::TableCache;
use crate::options::{Options, REPAIR_TABLE_CACHE_CAPACITY};
use crate::types::{WriteBatch, BATCH_HEADER_SIZE};
use crate::util::filename::{
    create_dir_if_missing, lg_dir, log_file_path, lost_dir, parse_file_name, FileType,
};
use crate::wal::WalReader;
use crate::{Error, Result};

use lg::LgRepair;

/// Rebuild a consistent descriptor for every locality group of the database
/// at `dbname` from its surviving write-ahead logs and tables.
///
/// Returns `Ok` once a usable descriptor is installed for every locality
/// group; otherwise the first failing locality group's error (the others
/// are still attempted). Some data may be lost, but everything the
/// surviving bytes allow is recovered, and an inconsistent descriptor is
/// never produced.
pub fn repair(dbname: impl AsRef<Path>, options: Options) -> Result<()> {
    options.validate()?;
    DbRepair::new(dbname.as_ref(), options)?.run()
}

/// Move `dir/foo` into the quarantine directory `dir/lost/foo`.
///
/// Archived files are never read again by the repair. Rename failures are
/// logged but do not fail the caller.
pub(crate) fn archive_file(path: &Path) {
    let Some(parent) = path.parent() else {
        warn!("not archiving {}: no parent directory", path.display());
        return;
    };
    let Some(name) = path.file_name() else {
        warn!("not archiving {}: no file name", path.display());
        return;
    };

    let archive = lost_dir(parent);
    let _ = create_dir_if_missing(&archive);

    let target = archive.join(name);
    match std::fs::rename(path, &target) {
        Ok(()) => info!("archived {} to {}", path.display(), target.display()),
        Err(err) => warn!("archiving {} failed: {}", path.display(), err),
    }
}

/// Coordinator owning the shared WAL stream and one [`LgRepair`] per
/// locality group.
struct DbRepair {
    /// Database root directory.
    dbname: PathBuf,
    /// Per-locality-group repairers, in ascending id order.
    repairers: BTreeMap<u32, LgRepair>,
    /// WAL file numbers found under the root, ascending.
    log_files: Vec<u64>,
    /// One past the largest WAL number observed.
    log_number: u64,
    /// Largest sequence number known to be persisted; replayed batches at
    /// or below this are duplicates.
    last_sequence: u64,
}

impl DbRepair {
    fn new(dbname: &Path, options: Options) -> Result<Self> {
        create_dir_if_missing(dbname)?;

        let table_cache = options
            .table_cache
            .clone()
            .unwrap_or_else(|| Arc::new(TableCache::new(REPAIR_TABLE_CACHE_CAPACITY)));

        let mut repairers = BTreeMap::new();
        for lg_id in options.locality_groups() {
            repairers.insert(
                lg_id,
                LgRepair::new(
                    lg_id,
                    lg_dir(dbname, lg_id),
                    options.clone(),
                    table_cache.clone(),
                ),
            );
        }

        Ok(Self {
            dbname: dbname.to_path_buf(),
            repairers,
            log_files: Vec::new(),
            log_number: 0,
            last_sequence: 0,
        })
    }

    fn run(&mut self) -> Result<()> {
        self.find_files()?;
        self.extract_metadata();
        self.convert_logs();
        self.write_descriptor()?;

        let mut files = 0usize;
        let mut bytes = 0u64;
        for repairer in self.repairers.values() {
            for table in repairer.tables() {
                files += 1;
                bytes += table.meta.file_size();
            }
        }
        info!(
            "**** Repaired database {}; recovered {} files; {} bytes. \
             Some data may have been lost. ****",
            self.dbname.display(),
            files,
            bytes
        );
        Ok(())
    }

    /// Enumerate the root directory for WAL files, then fan discovery out
    /// to every locality group.
    ///
    /// An empty root is fatal; nothing has been mutated at that point.
    fn find_files(&mut self) -> Result<()> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dbname)? {
            let name = entry?.file_name();
            names.push(name.to_string_lossy().into_owned());
        }
        if names.is_empty() {
            return Err(Error::NotFound(format!(
                "{}: repair found no files",
                self.dbname.display()
            )));
        }

        for name in &names {
            if let Some((FileType::Log, number)) = parse_file_name(name) {
                self.log_files.push(number);
                if number + 1 > self.log_number {
                    self.log_number = number + 1;
                }
            }
        }
        self.log_files.sort_unstable();

        for repairer in self.repairers.values_mut() {
            repairer.find_files()?;
        }

        info!(
            "[{}] found {} logs, next log number {:x}",
            self.dbname.display(),
            self.log_files.len(),
            self.log_number
        );
        Ok(())
    }

    /// Scan every locality group's tables; the largest sequence number
    /// found anywhere becomes the duplicate-suppression floor for replay.
    fn extract_metadata(&mut self) {
        for repairer in self.repairers.values_mut() {
            repairer.extract_metadata();
            if repairer.max_sequence() > self.last_sequence {
                self.last_sequence = repairer.max_sequence();
            }
        }
    }

    /// Replay all WALs in file-number order, archiving each afterwards
    /// whether or not its conversion succeeded.
    fn convert_logs(&mut self) {
        for log in self.log_files.clone() {
            if let Err(err) = self.convert_log_to_table(log) {
                warn!(
                    "[{}] Log #{:x}: ignoring conversion error: {}",
                    self.dbname.display(),
                    log,
                    err
                );
            }
            archive_file(&log_file_path(&self.dbname, log));
        }
    }

    /// Replay one WAL into the locality groups' memtables, then flush each
    /// locality group that received mutations to a new table.
    fn convert_log_to_table(&mut self, log: u64) -> Result<()> {
        let logname = log_file_path(&self.dbname, log);
        let dbname = self.dbname.display().to_string();

        // Checksums stay off so a damaged record drops one batch instead
        // of ending the replay; key shapes are re-validated by the table
        // scan that follows.
        let reporter = Box::new(move |bytes: usize, err: &Error| {
            warn!("[{}] Log #{:x}: dropping {} bytes; {}", dbname, log, bytes, err);
        });
        let mut reader = WalReader::with_reporter(&logname, log, false, Some(reporter))?;

        let mut counter = 0u64;
        while let Some(record) = reader.read_record()? {
            if record.len() < BATCH_HEADER_SIZE {
                warn!(
                    "[{}] Log #{:x}: dropping {} bytes; log record too small",
                    self.dbname.display(),
                    log,
                    record.len()
                );
                continue;
            }

            let batch = match WriteBatch::decode(&record) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(
                        "[{}] Log #{:x}: ignoring {}",
                        self.dbname.display(),
                        log,
                        err
                    );
                    continue;
                }
            };
            if batch.count() == 0 {
                continue;
            }

            let batch_seq = batch.sequence();
            let batch_count = batch.count() as u64;

            if batch_seq + batch_count - 1 <= self.last_sequence {
                info!(
                    "[{}] duplicate record, ignore {} ~ {}",
                    self.dbname.display(),
                    batch_seq,
                    batch_seq + batch_count - 1
                );
                continue;
            }

            if self.repairers.len() == 1 {
                // A single locality group takes the whole batch unsplit.
                for repairer in self.repairers.values_mut() {
                    repairer.insert_memtable(&batch, batch_seq);
                    counter += batch_count;
                }
            } else {
                for (lg_id, sub_batch) in batch.separate_locality_groups() {
                    match self.repairers.get_mut(&lg_id) {
                        Some(repairer) => {
                            repairer.insert_memtable(&sub_batch, sub_batch.sequence());
                            counter += sub_batch.count() as u64;
                        }
                        None => {
                            warn!(
                                "[{}] Log #{:x}: dropping {} mutations for unknown \
                                 locality group {}",
                                self.dbname.display(),
                                log,
                                sub_batch.count(),
                                lg_id
                            );
                        }
                    }
                }
            }

            // The sequence range is considered seen even if some inserts
            // above were dropped.
            self.last_sequence = batch_seq + batch_count - 1;
        }
        drop(reader);

        for repairer in self.repairers.values_mut() {
            if !repairer.has_memtable() {
                continue;
            }
            match repairer.build_table_file(log) {
                Ok(file_number) => {
                    // Scan failures are logged and archived by the repairer.
                    let _ = repairer.add_table_meta(file_number);
                }
                Err(err) => {
                    warn!(
                        "[{}][lg:{}] flushing Log #{:x}: ignoring {}",
                        self.dbname.display(),
                        repairer.lg_id(),
                        log,
                        err
                    );
                }
            }
        }

        info!(
            "[{}] Log #{:x}: {} entries recovered",
            self.dbname.display(),
            log,
            counter
        );
        Ok(())
    }

    /// Install the new descriptor for every locality group.
    ///
    /// All locality groups are attempted; the first failure is returned.
    fn write_descriptor(&mut self) -> Result<()> {
        let mut status = Ok(());
        for (lg_id, repairer) in self.repairers.iter_mut() {
            if let Err(err) = repairer.write_descriptor() {
                warn!(
                    "[{}][lg:{}] descriptor install failed: {}",
                    self.dbname.display(),
                    lg_id,
                    err
                );
                if status.is_ok() {
                    status = Err(err);
                }
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SyncMode;
    use crate::wal::WalWriter;
    use tempfile::tempdir;

    #[test]
    fn test_repair_empty_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let err = repair(dir.path(), Options::default()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_repair_creates_missing_root_then_fails_not_found() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("db");

        let err = repair(&root, Options::default()).unwrap_err();
        assert!(err.is_not_found());
        assert!(root.is_dir());
    }

    #[test]
    fn test_find_files_collects_logs_in_order() {
        let dir = tempdir().unwrap();
        for number in [3u64, 1, 2] {
            let mut writer =
                WalWriter::new(&log_file_path(dir.path(), number), number, SyncMode::None)
                    .unwrap();
            writer.add_record(b"x").unwrap();
            writer.close().unwrap();
        }

        let mut db = DbRepair::new(dir.path(), Options::default()).unwrap();
        db.find_files().unwrap();

        assert_eq!(db.log_files, vec![1, 2, 3]);
        assert_eq!(db.log_number, 4);
    }

    #[test]
    fn test_archive_file_moves_into_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stray.log");
        std::fs::write(&path, b"bytes").unwrap();

        archive_file(&path);

        assert!(!path.exists());
        assert!(lost_dir(dir.path()).join("stray.log").exists());
    }

    #[test]
    fn test_archive_file_tolerates_missing_source() {
        let dir = tempdir().unwrap();
        archive_file(&dir.path().join("never-existed.sst"));
    }
}
