//! Database file naming conventions.
//!
//! The root directory holds the shared write-ahead logs (numbers printed in
//! lowercase hex) and one subdirectory per locality group, named by its
//! decimal id. Each locality-group directory holds its own tables,
//! manifests, CURRENT pointer, and `lost/` archive.

use std::path::{Path, PathBuf};

/// File types recognized in a database directory.
///
/// Anything that does not parse is deliberately ignored so the repair
/// tolerates stale or foreign artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Write-ahead log file (root directory, hex number).
    Log,
    /// Sorted table file (locality-group directory, decimal number).
    Table,
    /// Manifest file (descriptor log).
    Manifest,
    /// Current file (points to the live manifest).
    Current,
    /// Temporary file used during atomic installs.
    Temp,
}

/// Generate the current file path.
pub fn current_file_path(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

/// Generate a manifest file path.
pub fn manifest_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{:06}", number))
}

/// Generate a log (WAL) file path. Log numbers are printed in lowercase hex.
pub fn log_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:08x}.log", number))
}

/// Generate a table file path.
pub fn table_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", number))
}

/// Generate a temporary file path.
pub fn temp_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.tmp", number))
}

/// Generate the subdirectory path for a locality group.
pub fn lg_dir(db_path: &Path, lg_id: u32) -> PathBuf {
    db_path.join(lg_id.to_string())
}

/// Generate the archive directory path for files removed from consideration.
pub fn lost_dir(dir: &Path) -> PathBuf {
    dir.join("lost")
}

/// Parse a file name and return its type and number.
///
/// Returns `None` if the file name doesn't match any known pattern.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "CURRENT" {
        return Some((FileType::Current, 0));
    }

    // Manifest files: MANIFEST-NNNNNN
    if let Some(suffix) = name.strip_prefix("MANIFEST-") {
        if let Ok(number) = suffix.parse::<u64>() {
            return Some((FileType::Manifest, number));
        }
        return None;
    }

    // Numbered files: NNNNNN.ext
    let dot_pos = name.rfind('.')?;
    let (num_str, ext) = name.split_at(dot_pos);
    let ext = &ext[1..];

    match ext {
        // Log numbers are hex, table and temp numbers decimal.
        "log" => u64::from_str_radix(num_str, 16)
            .ok()
            .map(|n| (FileType::Log, n)),
        "sst" => num_str.parse::<u64>().ok().map(|n| (FileType::Table, n)),
        "tmp" => num_str.parse::<u64>().ok().map(|n| (FileType::Temp, n)),
        _ => None,
    }
}

/// Set the current manifest file.
///
/// Writes the pointer through a temp file and renames it into place, so
/// observers either see the old pointer or the new one.
pub fn set_current_file(dir: &Path, manifest_number: u64) -> std::io::Result<()> {
    let manifest_name = format!("MANIFEST-{:06}", manifest_number);
    let current_path = current_file_path(dir);
    let temp_path = dir.join("CURRENT.tmp");

    std::fs::write(&temp_path, format!("{}\n", manifest_name))?;

    let file = std::fs::File::open(&temp_path)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, &current_path)?;

    Ok(())
}

/// Read the current manifest file name, if a CURRENT pointer exists.
pub fn read_current_file(dir: &Path) -> std::io::Result<Option<String>> {
    let path = current_file_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(content.trim().to_string()))
}

/// Get the file size.
pub fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_paths() {
        let dir = Path::new("/data/db");

        assert_eq!(current_file_path(dir), Path::new("/data/db/CURRENT"));
        assert_eq!(
            manifest_file_path(dir, 5),
            Path::new("/data/db/MANIFEST-000005")
        );
        assert_eq!(log_file_path(dir, 255), Path::new("/data/db/000000ff.log"));
        assert_eq!(table_file_path(dir, 456), Path::new("/data/db/000456.sst"));
        assert_eq!(temp_file_path(dir, 789), Path::new("/data/db/000789.tmp"));
        assert_eq!(lg_dir(dir, 3), Path::new("/data/db/3"));
        assert_eq!(lost_dir(dir), Path::new("/data/db/lost"));
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("CURRENT"), Some((FileType::Current, 0)));
        assert_eq!(
            parse_file_name("MANIFEST-000005"),
            Some((FileType::Manifest, 5))
        );
        assert_eq!(parse_file_name("000000ff.log"), Some((FileType::Log, 255)));
        assert_eq!(parse_file_name("00000001.log"), Some((FileType::Log, 1)));
        assert_eq!(parse_file_name("000456.sst"), Some((FileType::Table, 456)));
        assert_eq!(parse_file_name("000789.tmp"), Some((FileType::Temp, 789)));

        assert_eq!(parse_file_name("MANIFEST-"), None);
        assert_eq!(parse_file_name("random.txt"), None);
        assert_eq!(parse_file_name("xyz.sst"), None);
        assert_eq!(parse_file_name("lost"), None);
        assert_eq!(parse_file_name("LOCK"), None);
    }

    #[test]
    fn test_log_names_parse_as_hex() {
        // "10.log" is sixteen, not ten.
        assert_eq!(parse_file_name("10.log"), Some((FileType::Log, 16)));

        let path = log_file_path(Path::new("/db"), 16);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(parse_file_name(&name), Some((FileType::Log, 16)));
    }

    #[test]
    fn test_set_and_read_current() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path();

        assert_eq!(read_current_file(dir).unwrap(), None);

        set_current_file(dir, 42).unwrap();
        assert_eq!(
            read_current_file(dir).unwrap().as_deref(),
            Some("MANIFEST-000042")
        );

        // The temp pointer must not linger.
        assert!(!dir.join("CURRENT.tmp").exists());
    }

    #[test]
    fn test_delete_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("test.txt");

        // Delete of a non-existent file succeeds.
        assert!(delete_file(&path).is_ok());

        std::fs::write(&path, "test").unwrap();
        delete_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_create_dir_if_missing() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("dir");

        create_dir_if_missing(&path).unwrap();
        assert!(path.is_dir());

        // Idempotent.
        create_dir_if_missing(&path).unwrap();
    }
}
