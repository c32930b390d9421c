//! Append-only file for CheckVault
//!
//! Every mutating command is written here, one text line per record, and
//! synced before the command is applied in memory. On startup the file is
//! replayed to rebuild the store; `rewrite` compacts it down to one record
//! per live pipeline.

use crate::error::{CheckVaultError, Result};
use crate::protocol::SET_CHECKPOINT;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

/// Append-only log of checkpoint mutations
#[derive(Debug)]
pub struct AppendOnlyLog {
    path: PathBuf,
    // None once a rewrite replaced the file but could not reopen it; appends
    // fail until a later rewrite succeeds.
    file: Option<File>,
}

impl AppendOnlyLog {
    /// Open the log at `path`, creating it if needed. A torn record left at
    /// the end of the file by a crash during `append` is cut off.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_for_append(&path)?;
        let log = Self {
            path,
            file: Some(file),
        };
        log.truncate_torn_tail()?;
        debug!(path = %log.path.display(), "opened append-only log");
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the log in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.handle()?.metadata()?.len())
    }

    /// Append one record and sync it to storage. On failure nothing of the
    /// record is left in the file.
    pub fn append(&mut self, record: &str) -> Result<()> {
        if record.contains('\n') {
            return Err(CheckVaultError::Aof(
                "record must not contain a newline".to_string(),
            ));
        }

        let mut file = self.handle()?;
        let len_before = file.metadata()?.len();
        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record.as_bytes());
        line.push(b'\n');

        if let Err(err) = file.write_all(&line).and_then(|()| file.sync_data()) {
            if let Err(truncate_err) = file.set_len(len_before) {
                warn!(error = %truncate_err, "failed to roll back partial AOF record");
            }
            return Err(err.into());
        }

        Ok(())
    }

    /// Records in the order they were written. Each call starts from the
    /// beginning of the file; a missing file yields nothing.
    pub fn replay(&self) -> Result<Replay> {
        match File::open(&self.path) {
            Ok(file) => Ok(Replay {
                lines: Some(BufReader::new(file).lines()),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Replay { lines: None }),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the log with one `SET_CHECKPOINT` record per snapshot entry.
    ///
    /// The new contents are written to a temporary file next to the log and
    /// renamed over it, so a crash leaves either the old or the new log.
    pub fn rewrite(&mut self, snapshot: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut temp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(&mut temp);
            for (pipeline, value) in snapshot {
                writeln!(writer, "{} {} {}", SET_CHECKPOINT, pipeline, value)?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|err| CheckVaultError::Io(err.error))?;

        // The old handle now points at an unlinked file.
        self.file = None;
        match open_for_append(&self.path) {
            Ok(file) => self.file = Some(file),
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "failed to reopen append-only log after rewrite");
                return Err(err.into());
            }
        }
        sync_dir(&dir)?;

        info!(
            path = %self.path.display(),
            records = snapshot.len(),
            "rewrote append-only log"
        );
        Ok(())
    }

    fn handle(&self) -> Result<&File> {
        self.file.as_ref().ok_or_else(|| {
            CheckVaultError::Aof(format!(
                "{} is not open after a failed rewrite",
                self.path.display()
            ))
        })
    }

    fn truncate_torn_tail(&self) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut record = Vec::new();
        let mut total = 0u64;
        let mut complete = 0u64;

        loop {
            record.clear();
            let read = reader.read_until(b'\n', &mut record)?;
            if read == 0 {
                break;
            }
            total += read as u64;
            if record.last() == Some(&b'\n') {
                complete = total;
            }
        }

        if total > complete {
            warn!(
                path = %self.path.display(),
                dropped_bytes = total - complete,
                "dropping torn record at end of append-only log"
            );
            let file = self.handle()?;
            file.set_len(complete)?;
            file.sync_all()?;
        }

        Ok(())
    }
}

/// Lazy iterator over the records of an [`AppendOnlyLog`]
pub struct Replay {
    lines: Option<Lines<BufReader<File>>>,
}

impl Iterator for Replay {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        lines.next().map(|line| line.map_err(CheckVaultError::from))
    }
}

fn open_for_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
