//! Slot persistence: atomic single-value writes plus a small CSV-backed
//! record store used by sources that keep history between runs.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Sibling temp path used while a slot write is in flight.
fn temp_path(slot: &Path) -> PathBuf {
    let mut name = slot.as_os_str().to_os_string();
    name.push("~");
    PathBuf::from(name)
}

/// Atomically replace the contents of `slot` with `data`.
///
/// Writes to a sibling temp file, forces it to disk, then renames it over
/// the slot, so a concurrent reader only ever sees the old or the new
/// content in full.
pub fn save_slot(slot: &Path, data: &[u8]) -> anyhow::Result<()> {
    let tmp = temp_path(slot);
    let mut file =
        File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, slot)
        .with_context(|| format!("failed to rename {} over {}", tmp.display(), slot.display()))?;
    Ok(())
}

/// Read all records from a CSV slot. A missing slot is an empty history,
/// not an error.
pub fn load_records(slot: &Path) -> anyhow::Result<Vec<Vec<String>>> {
    if !slot.is_file() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(slot)
        .with_context(|| format!("failed to open {}", slot.display()))?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(str::to_owned).collect());
    }
    Ok(rows)
}

/// Serialize `rows` as CSV and persist them with the same
/// temp-fsync-rename discipline as [`save_slot`].
pub fn save_records<R, F>(slot: &Path, rows: R) -> anyhow::Result<()>
where
    R: IntoIterator<Item = F>,
    F: IntoIterator<Item = String>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row.into_iter().map(|field| field.into_bytes()))?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV buffer: {}", e.error()))?;
    save_slot(slot, &data)
}
