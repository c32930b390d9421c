//! Order records used by the demo producer and pipeline binaries
//!
//! The data file holds one JSON object per line. The pipeline uses the
//! largest `updated_at` it has processed as its checkpoint.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: u64,
    pub updated_at: i64,
    pub amount: u32,
}

/// Append one record to the data file, creating it if needed.
pub fn append_record(path: &Path, record: &OrderRecord) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(())
}

/// Records with `updated_at` strictly after `since`, or every record when
/// there is no checkpoint yet. A missing data file has no records.
pub fn read_new_records(path: &Path, since: Option<i64>) -> Result<Vec<OrderRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: OrderRecord = serde_json::from_str(&line)?;
        if since.map_or(true, |since| record.updated_at > since) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Checkpoint to commit after processing `records`.
pub fn next_checkpoint(records: &[OrderRecord]) -> Option<i64> {
    records.iter().map(|record| record.updated_at).max()
}
