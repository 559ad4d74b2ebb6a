use crate::error::StoreError;
use crate::models::Record;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How `save` treats the file it is about to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Copy the previous file to `<stem>_backup_<timestamp>.json` first.
    pub backup: bool,
    /// Number of backups to keep per collection; 0 keeps all of them.
    pub max_backups: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            backup: true,
            max_backups: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub pruned: usize,
}

/// Loads the persisted collection. A missing, unreadable or malformed file
/// yields an empty collection so that a fresh environment is never an error.
pub fn load(path: &Path) -> Vec<Record> {
    if !path.exists() {
        info!("No collection at {}, starting empty", path.display());
        return Vec::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not read {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let items = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!("{} does not hold a JSON array, ignoring it", path.display());
            return Vec::new();
        }
        Err(e) => {
            warn!("{} is not valid JSON: {}", path.display(), e);
            return Vec::new();
        }
    };

    let total = items.len();
    let records: Vec<Record> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    if records.len() != total {
        warn!(
            "Dropped {} non-object entries from {}",
            total - records.len(),
            path.display()
        );
    }
    info!("Loaded {} records from {}", records.len(), path.display());
    records
}

/// Writes the whole collection, replacing the previous file.
///
/// The new content goes to a sibling temp file that is renamed over the
/// destination, so a crash leaves either the old or the new file in place.
pub fn save(path: &Path, records: &[Record], options: SaveOptions) -> Result<SaveReport, StoreError> {
    let mut buf = serde_json::to_vec_pretty(records)?;
    buf.push(b'\n');

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

    let backup = if options.backup && path.exists() {
        let backup_path = backup_path(path);
        fs::copy(path, &backup_path).map_err(|e| StoreError::io(&backup_path, e))?;
        debug!("Backed up {} to {}", path.display(), backup_path.display());
        Some(backup_path)
    } else {
        None
    };

    let tmp = tmp_path(path);
    if let Err(e) = write_synced(&tmp, &buf) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(&tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    info!("Saved {} records to {}", records.len(), path.display());

    let pruned = if backup.is_some() && options.max_backups > 0 {
        prune_backups(path, options.max_backups)
    } else {
        0
    };

    Ok(SaveReport {
        path: path.to_path_buf(),
        backup,
        pruned,
    })
}

fn write_synced(path: &Path, buf: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(buf)?;
    file.sync_all()
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "collection".to_string())
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "collection.json".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

fn backup_prefix(path: &Path) -> String {
    format!("{}_backup_", stem(path))
}

/// `<stem>_backup_<YYYYmmdd_HHMMSS>.json`, suffixed `_001`, `_002`, ... when
/// several saves land in the same second. The suffix is zero-padded so names
/// keep sorting in creation order.
fn backup_path(path: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let base = format!("{}{}", backup_prefix(path), timestamp);
    let mut candidate = path.with_file_name(format!("{}.json", base));
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{}_{:03}.json", base, n));
        n += 1;
    }
    candidate
}

/// Lists backups of `path`, oldest first.
pub fn list_backups(path: &Path) -> Vec<PathBuf> {
    let prefix = backup_prefix(path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut backups: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"))
        })
        .collect();
    // timestamps sort lexicographically
    backups.sort();
    backups
}

fn prune_backups(path: &Path, keep: usize) -> usize {
    let backups = list_backups(path);
    if backups.len() <= keep {
        return 0;
    }
    let excess = backups.len() - keep;
    let mut removed = 0;
    for old in backups.into_iter().take(excess) {
        match fs::remove_file(&old) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not remove old backup {}: {}", old.display(), e),
        }
    }
    removed
}
