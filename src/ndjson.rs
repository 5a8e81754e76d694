//! Newline-delimited JSON file helpers.
//!
//! Readers are lenient: blank lines are ignored and lines that fail to parse
//! are logged and counted, never fatal. I/O errors on the file itself do
//! propagate.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read typed records from an NDJSON file.
///
/// Returns the parsed records in file order together with the number of
/// lines skipped because they were not valid JSON for the target type.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, usize)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line_num, line) in reader.lines().enumerate() {
        let line =
            line.with_context(|| format!("reading line {} of {}", line_num + 1, path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(
                    "skipping bad json line {} in {}: {err}",
                    line_num + 1,
                    path.display()
                );
                skipped += 1;
            }
        }
    }

    Ok((records, skipped))
}

/// Write records to an NDJSON file, one compact JSON object per line.
///
/// Parent directories are created as needed; an existing file is replaced.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)
            .with_context(|| format!("serializing record for {}", path.display()))?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}
