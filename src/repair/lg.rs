//! Per-locality-group repairer.
//!
//! Each locality group is an independent sub-LSM under its own
//! subdirectory. The repairer discovers its files, scans every table for
//! its key range and maximum sequence number, accumulates replayed WAL
//! mutations in a memtable, flushes them to new level-0 tables, and finally
//! synthesizes and installs a fresh descriptor.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::TableCache;
use crate::memtable::MemTable;
use crate::options::Options;
use crate::sstable::{TableBuilder, TableIterator};
use crate::types::{InternalKey, WriteBatch};
use crate::util::filename::{
    create_dir_if_missing, delete_file, file_size, manifest_file_path, parse_file_name,
    set_current_file, table_file_path, temp_file_path, FileType,
};
use crate::version::{FileMeta, ManifestWriter, VersionEdit};
use crate::{Error, Result};

use super::archive_file;

/// A scanned table: its descriptor metadata plus the largest sequence
/// number observed in it.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Descriptor metadata (number, size, key range).
    pub meta: FileMeta,
    /// Largest sequence number in the table.
    pub max_sequence: u64,
}

/// Repairer for a single locality group.
pub struct LgRepair {
    /// Locality group id.
    lg_id: u32,
    /// The locality group's subdirectory.
    dbname: PathBuf,
    /// Repair options (shared with the coordinator).
    options: Options,
    /// Cache used to open tables for scanning.
    table_cache: Arc<TableCache>,
    /// Pre-existing manifest file names found during discovery.
    manifests: Vec<String>,
    /// Table file numbers found during discovery.
    table_numbers: Vec<u64>,
    /// Tables retained for the new descriptor.
    tables: Vec<TableInfo>,
    /// Next file number to assign; exceeds every observed number.
    next_file_number: u64,
    /// Memtable holding replayed mutations, created lazily.
    mem: Option<MemTable>,
    /// Largest sequence number seen in this locality group.
    max_sequence: u64,
}

impl LgRepair {
    /// Create a repairer for the locality group rooted at `dbname`.
    pub fn new(
        lg_id: u32,
        dbname: PathBuf,
        options: Options,
        table_cache: Arc<TableCache>,
    ) -> Self {
        Self {
            lg_id,
            dbname,
            options,
            table_cache,
            manifests: Vec::new(),
            table_numbers: Vec::new(),
            tables: Vec::new(),
            next_file_number: 1,
            mem: None,
            max_sequence: 0,
        }
    }

    /// Locality group id.
    pub fn lg_id(&self) -> u32 {
        self.lg_id
    }

    /// Largest sequence number seen so far in this locality group.
    pub fn max_sequence(&self) -> u64 {
        self.max_sequence
    }

    /// Tables retained for the new descriptor.
    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    /// Enumerate the locality group's subdirectory.
    ///
    /// Manifests become archival candidates, tables become scan targets,
    /// and every observed file number advances `next_file_number`. A
    /// missing subdirectory is treated as empty (and created, so later
    /// steps have somewhere to install the descriptor).
    pub fn find_files(&mut self) -> Result<()> {
        create_dir_if_missing(&self.dbname)?;

        for entry in std::fs::read_dir(&self.dbname)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            let Some((file_type, number)) = parse_file_name(&name) else {
                continue;
            };

            if number + 1 > self.next_file_number {
                self.next_file_number = number + 1;
            }
            match file_type {
                FileType::Manifest => self.manifests.push(name.into_owned()),
                FileType::Table => self.table_numbers.push(number),
                _ => {}
            }
        }

        self.table_numbers.sort_unstable();
        Ok(())
    }

    /// Scan every discovered table, retaining the scannable ones and
    /// archiving the rest.
    pub fn extract_metadata(&mut self) {
        let numbers = std::mem::take(&mut self.table_numbers);
        for number in numbers {
            match self.scan_table(number) {
                Ok(table) => {
                    if table.max_sequence > self.max_sequence {
                        self.max_sequence = table.max_sequence;
                    }
                    self.tables.push(table);
                }
                Err(err) => {
                    warn!(
                        "[{}] Table #{}: ignoring {}",
                        self.dbname.display(),
                        number,
                        err
                    );
                    archive_file(&table_file_path(&self.dbname, number));
                }
            }
        }
    }

    /// Apply a replayed batch at the given starting sequence number.
    ///
    /// The memtable is created lazily on the first insert after each flush.
    pub fn insert_memtable(&mut self, batch: &WriteBatch, sequence: u64) {
        debug_assert!(
            sequence > self.max_sequence,
            "replayed sequence {} must exceed locality group max {}",
            sequence,
            self.max_sequence
        );
        self.max_sequence = sequence + batch.count() as u64 - 1;

        self.mem
            .get_or_insert_with(MemTable::new)
            .insert_batch(batch, sequence);
    }

    /// Whether any replayed mutations are waiting to be flushed.
    pub fn has_memtable(&self) -> bool {
        self.mem.is_some()
    }

    /// Flush the memtable to a newly numbered table file.
    ///
    /// Returns the new file number; the memtable is consumed either way.
    pub fn build_table_file(&mut self, log_number: u64) -> Result<u64> {
        let mem = self
            .mem
            .take()
            .ok_or_else(|| Error::internal("no memtable to flush"))?;

        let file_number = self.next_file_number;
        self.next_file_number += 1;

        let path = table_file_path(&self.dbname, file_number);
        let mut builder = TableBuilder::new(
            &path,
            file_number,
            self.options.compression,
            self.options.bloom_filter_bits_per_key,
            self.options.block_size,
        )?;

        for (key, value) in mem.iter_encoded() {
            builder.add(&key, &value)?;
        }
        let build = builder.finish()?;

        info!(
            "[{}][lg:{}] Log #{:x}: {} entries saved to Table #{}",
            self.dbname.display(),
            self.lg_id,
            log_number,
            build.entry_count,
            file_number
        );
        Ok(file_number)
    }

    /// Scan a freshly built table and retain it for the descriptor.
    ///
    /// The rescan recovers `smallest`/`largest`/`max_sequence` exactly the
    /// way a pre-existing table would; a table that fails its scan is
    /// archived and the error returned.
    pub fn add_table_meta(&mut self, table_number: u64) -> Result<()> {
        match self.scan_table(table_number) {
            Ok(table) => {
                self.tables.push(table);
                Ok(())
            }
            Err(err) => {
                warn!(
                    "[{}] Table #{}: ignoring {}",
                    self.dbname.display(),
                    table_number,
                    err
                );
                archive_file(&table_file_path(&self.dbname, table_number));
                Err(err)
            }
        }
    }

    /// Scan one table front to back.
    ///
    /// Unparsable keys are logged and skipped; they contribute nothing to
    /// the key range or sequence bound. A table with zero parsable keys is
    /// corrupt.
    fn scan_table(&self, table_number: u64) -> Result<TableInfo> {
        let path = table_file_path(&self.dbname, table_number);
        let size = file_size(&path)?;

        let cached = self.table_cache.get(&self.dbname, table_number)?;
        let scanned = cached.with_reader(|reader| -> Result<TableInfo> {
            let mut iter = TableIterator::new(reader)?;
            iter.seek_to_first()?;

            let mut counter = 0u64;
            let mut smallest: Option<InternalKey> = None;
            let mut largest: Option<InternalKey> = None;
            let mut max_sequence = 0u64;

            while let Some(raw) = iter.key() {
                match InternalKey::decode(raw) {
                    None => {
                        warn!(
                            "[{}] Table #{}: unparsable key {:02x?}",
                            self.dbname.display(),
                            table_number,
                            raw.as_ref()
                        );
                    }
                    Some(parsed) => {
                        counter += 1;
                        if parsed.sequence() > max_sequence {
                            max_sequence = parsed.sequence();
                        }
                        if smallest.is_none() {
                            smallest = Some(parsed.clone());
                        }
                        largest = Some(parsed);
                    }
                }
                iter.next()?;
            }

            let (Some(smallest), Some(largest)) = (smallest, largest) else {
                return Err(Error::corruption("sst is empty"));
            };

            info!(
                "[{}] Table #{}: {} entries",
                self.dbname.display(),
                table_number,
                counter
            );
            Ok(TableInfo {
                meta: FileMeta::new(table_number, size, smallest, largest),
                max_sequence,
            })
        })?;

        Ok(scanned)
    }

    /// Synthesize the new descriptor and atomically install it.
    ///
    /// The edit is written to a temp file first. Only once that succeeds
    /// are the old manifests archived; the rename to the canonical
    /// descriptor path and the `CURRENT` repoint are the commit points.
    pub fn write_descriptor(&mut self) -> Result<()> {
        let tmp = temp_file_path(&self.dbname, 1);

        let mut max_sequence = 0u64;
        for table in &self.tables {
            if table.max_sequence > max_sequence {
                max_sequence = table.max_sequence;
            }
        }

        let mut edit = VersionEdit::new();
        edit.set_comparator(self.options.comparator.name());
        edit.set_log_number(0);
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(max_sequence);
        for table in &self.tables {
            // TODO(opt): distribute non-overlapping tables above level 0.
            edit.add_file(0, table.meta.clone());
        }

        let written = ManifestWriter::new(&tmp, 1, self.options.sync_mode)
            .and_then(|mut writer| {
                writer.add_edit(&edit)?;
                writer.close()
            });
        if let Err(err) = written {
            let _ = delete_file(&tmp);
            return Err(err);
        }

        // Old manifests stop being reachable only now that the replacement
        // descriptor exists on disk.
        let manifests = std::mem::take(&mut self.manifests);
        for manifest in &manifests {
            archive_file(&self.dbname.join(manifest));
        }

        let descriptor = manifest_file_path(&self.dbname, 1);
        if let Err(err) = std::fs::rename(&tmp, &descriptor) {
            let _ = delete_file(&tmp);
            return Err(err.into());
        }

        set_current_file(&self.dbname, 1)?;

        info!(
            "[{}][lg:{}] installed descriptor with {} files, last sequence {}",
            self.dbname.display(),
            self.lg_id,
            self.tables.len(),
            max_sequence
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::CompressionType;
    use crate::types::ValueType;
    use crate::util::filename::{lost_dir, read_current_file};
    use crate::version::ManifestReader;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn new_lg(dir: &std::path::Path) -> LgRepair {
        LgRepair::new(
            0,
            dir.to_path_buf(),
            Options::default(),
            Arc::new(TableCache::new(10)),
        )
    }

    fn write_table(dir: &std::path::Path, number: u64, keys: &[(&[u8], u64)]) {
        let path = table_file_path(dir, number);
        let mut builder = TableBuilder::new(&path, number, CompressionType::None, 10, 4096).unwrap();
        for (user_key, seq) in keys {
            let key = InternalKey::new(Bytes::copy_from_slice(user_key), *seq, ValueType::Value);
            builder.add(&key.encode(), b"v").unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_find_files_classifies_and_advances_numbers() {
        let dir = tempdir().unwrap();
        write_table(dir.path(), 7, &[(b"a", 1)]);
        std::fs::write(dir.path().join("MANIFEST-000003"), b"x").unwrap();
        std::fs::write(dir.path().join("CURRENT"), b"MANIFEST-000003\n").unwrap();
        std::fs::write(dir.path().join("junk.bin"), b"?").unwrap();

        let mut lg = new_lg(dir.path());
        lg.find_files().unwrap();

        assert_eq!(lg.table_numbers, vec![7]);
        assert_eq!(lg.manifests, vec!["MANIFEST-000003".to_string()]);
        assert_eq!(lg.next_file_number, 8);
    }

    #[test]
    fn test_find_files_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let lg_path = dir.path().join("5");

        let mut lg = new_lg(&lg_path);
        lg.find_files().unwrap();

        assert!(lg_path.is_dir());
        assert!(lg.table_numbers.is_empty());
    }

    #[test]
    fn test_scan_table_recovers_range_and_sequence() {
        let dir = tempdir().unwrap();
        write_table(dir.path(), 1, &[(b"a", 5), (b"b", 6)]);

        let mut lg = new_lg(dir.path());
        lg.find_files().unwrap();
        lg.extract_metadata();

        assert_eq!(lg.tables.len(), 1);
        let table = &lg.tables[0];
        assert_eq!(table.meta.smallest().user_key(), b"a");
        assert_eq!(table.meta.smallest().sequence(), 5);
        assert_eq!(table.meta.largest().user_key(), b"b");
        assert_eq!(table.max_sequence, 6);
        assert_eq!(lg.max_sequence(), 6);
    }

    #[test]
    fn test_empty_table_is_archived() {
        let dir = tempdir().unwrap();
        let path = table_file_path(dir.path(), 2);
        let builder = TableBuilder::new(&path, 2, CompressionType::None, 10, 4096).unwrap();
        builder.finish().unwrap();

        let mut lg = new_lg(dir.path());
        lg.find_files().unwrap();
        lg.extract_metadata();

        assert!(lg.tables.is_empty());
        assert!(!path.exists());
        assert!(lost_dir(dir.path()).join("000002.sst").exists());
    }

    #[test]
    fn test_garbage_table_is_archived() {
        let dir = tempdir().unwrap();
        let path = table_file_path(dir.path(), 3);
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let mut lg = new_lg(dir.path());
        lg.find_files().unwrap();
        lg.extract_metadata();

        assert!(lg.tables.is_empty());
        assert!(lost_dir(dir.path()).join("000003.sst").exists());
    }

    #[test]
    fn test_insert_flush_and_rescan() {
        let dir = tempdir().unwrap();
        let mut lg = new_lg(dir.path());
        lg.find_files().unwrap();

        assert!(!lg.has_memtable());

        let mut batch = WriteBatch::new();
        batch.put(0, b"k".as_slice(), b"v".as_slice());
        lg.insert_memtable(&batch, 10);

        assert!(lg.has_memtable());
        assert_eq!(lg.max_sequence(), 10);

        let file_number = lg.build_table_file(1).unwrap();
        assert_eq!(file_number, 1);
        assert!(!lg.has_memtable());

        lg.add_table_meta(file_number).unwrap();
        assert_eq!(lg.tables.len(), 1);
        assert_eq!(lg.tables[0].max_sequence, 10);
    }

    #[test]
    fn test_write_descriptor_installs_current() {
        let dir = tempdir().unwrap();
        write_table(dir.path(), 1, &[(b"a", 5), (b"b", 6)]);
        std::fs::write(dir.path().join("MANIFEST-000009"), b"old").unwrap();

        let mut lg = new_lg(dir.path());
        lg.find_files().unwrap();
        lg.extract_metadata();
        lg.write_descriptor().unwrap();

        // Old manifest archived, new descriptor live.
        assert!(!dir.path().join("MANIFEST-000009").exists());
        assert!(lost_dir(dir.path()).join("MANIFEST-000009").exists());
        assert_eq!(
            read_current_file(dir.path()).unwrap().as_deref(),
            Some("MANIFEST-000001")
        );

        let mut reader =
            ManifestReader::new(&manifest_file_path(dir.path(), 1), 1).unwrap();
        let edits = reader.read_all_edits().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].log_number, Some(0));
        assert_eq!(edits[0].last_sequence, Some(6));
        assert_eq!(edits[0].next_file_number, Some(10));
        assert_eq!(edits[0].new_files.len(), 1);
    }
}
