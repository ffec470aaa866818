//! Newline-delimited JSON append log for the in-memory backend.
//!
//! Each line is one `{"shortURLValue":…,"longURLValue":…}` object. Writes
//! open the file with create+append and flush before returning; no fsync is
//! issued. Replay streams the file from start to EOF, and the caller applies
//! last-entry-wins when rebuilding its map.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// One persisted `(short, long)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "shortURLValue")]
    pub short_url: String,
    #[serde(rename = "longURLValue")]
    pub long_url: String,
}

/// Appends one record, opening the file per write.
pub fn append(path: &Path, record: &LogRecord) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, record)?;
    file.write_all(b"\n")
}

/// Reads every record from start to EOF.
pub fn replay(path: &Path) -> io::Result<Vec<LogRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
