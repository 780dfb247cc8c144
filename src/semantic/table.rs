//! On-disk vector table: a single structured JSON file.
//!
//! The table owns its commit protocol explicitly (write temp file, fsync,
//! atomic rename) instead of patching the persistence of an underlying
//! engine. Because the whole table is one structured file, a crashed writer
//! can leave truncated bytes behind; [`VectorTable::load`] validates before
//! use and repairs by locating the last complete record boundary. The
//! original corrupt bytes are always preserved in a backup file, and
//! corruption never prevents startup.

use crate::types::{Result, VectorRecord};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Current table file format version.
pub const TABLE_VERSION: u32 = 1;

/// Persisted vector table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorTable {
    pub version: u32,
    pub items: Vec<VectorRecord>,
}

impl Default for VectorTable {
    fn default() -> Self {
        Self {
            version: TABLE_VERSION,
            items: Vec::new(),
        }
    }
}

impl VectorTable {
    /// Load the table at `path`, repairing or resetting on corruption.
    ///
    /// A missing file yields an empty table. Bytes that fail to parse are
    /// backed up, then repaired from the last complete record boundary; if
    /// no boundary is found (or the repair itself fails to parse), the
    /// backup is kept and an empty table is returned.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&raw) {
            Ok(table) => Ok(table),
            Err(parse_err) => {
                warn!(
                    path = %path.display(),
                    error = %parse_err,
                    "vector table failed to parse, attempting repair"
                );
                let backup = backup_corrupt(path, &raw)?;
                info!(backup = %backup.display(), "backed up corrupt vector table");

                let items = recover_items(&raw);
                if items.is_empty() {
                    warn!("no complete records recovered, starting with empty table");
                    let table = Self::default();
                    table.save(path)?;
                    return Ok(table);
                }

                let table = Self {
                    version: TABLE_VERSION,
                    items,
                };
                table.save(path)?;
                info!(
                    recovered = table.items.len(),
                    "repaired vector table from last complete record"
                );
                Ok(table)
            }
        }
    }

    /// Atomically persist the table: write temp, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&serde_json::to_vec(self)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;

        // Durability of the rename itself; failure only degrades crash
        // safety of the directory entry.
        if let Some(parent) = path.parent() {
            if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
                warn!(error = %e, "directory sync after rename failed");
            }
        }
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Copy corrupt bytes to a timestamped backup beside the table file.
fn backup_corrupt(path: &Path, raw: &str) -> Result<std::path::PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
    let name = format!(
        "{}.corrupt-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string()),
        stamp
    );
    let backup = path.with_file_name(name);
    std::fs::write(&backup, raw)?;
    Ok(backup)
}

/// Scan truncated JSON for complete records in the `items` array.
///
/// Walks the array with a string-and-escape-aware depth counter; every
/// object that closes back to array depth is a complete record and is kept
/// if it deserializes. Scanning stops at the truncation point, which is the
/// last complete record boundary.
fn recover_items(raw: &str) -> Vec<VectorRecord> {
    let array_start = match raw.find("\"items\"").and_then(|i| raw[i..].find('[').map(|j| i + j)) {
        Some(idx) => idx,
        None => return Vec::new(),
    };

    let bytes = raw.as_bytes();
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut record_start = None;

    for (offset, &b) in bytes[array_start..].iter().enumerate() {
        let pos = array_start + offset;

        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    record_start = Some(pos);
                }
                depth += 1;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(start) = record_start.take() {
                        if let Ok(record) =
                            serde_json::from_str::<VectorRecord>(&raw[start..=pos])
                        {
                            items.push(record);
                        }
                    }
                }
            }
            b']' if depth == 0 => break,
            _ => {}
        }
    }

    items
}
