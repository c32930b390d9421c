//! Command dispatcher
//!
//! Turns one protocol line into one response, applying it to the store and
//! recording mutations in the AOF. Knows nothing about sockets.

use crate::aof::AppendOnlyLog;
use crate::error::Result;
use crate::protocol::{parse_command, ttl_duration, Command, Response};
use crate::store::{MemoryStore, Store};
use tracing::{debug, error, warn};

/// Where a command line comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Sent by a client: mutations are appended to the AOF.
    Live,
    /// Read back from the AOF at startup: mutations are not re-appended.
    Replay,
}

/// Outcome of rebuilding the store from the AOF
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub skipped: usize,
}

pub struct Dispatcher<S: Store = MemoryStore> {
    store: S,
    log: AppendOnlyLog,
}

impl<S: Store> Dispatcher<S> {
    pub fn new(store: S, log: AppendOnlyLog) -> Self {
        Self { store, log }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log(&self) -> &AppendOnlyLog {
        &self.log
    }

    /// Rebuild the store by replaying every AOF record. Records that do not
    /// parse are skipped; read errors abort.
    pub fn restore(&mut self) -> Result<ReplayStats> {
        let mut stats = ReplayStats::default();

        for (index, record) in self.log.replay()?.enumerate() {
            let record = record?;
            if record.trim().is_empty() {
                continue;
            }

            match self.dispatch(&record, Mode::Replay) {
                Response::Error(reason) => {
                    warn!(line = index + 1, %reason, "skipping unreadable AOF record");
                    stats.skipped += 1;
                }
                _ => stats.applied += 1,
            }
        }

        Ok(stats)
    }

    /// Parse and execute one command line.
    pub fn dispatch(&mut self, line: &str, mode: Mode) -> Response {
        match parse_command(line) {
            Ok(command) => self.execute(command, mode),
            Err(err) => {
                debug!(%line, error = %err, "rejected command");
                Response::error(err)
            }
        }
    }

    /// Execute a parsed command
    pub fn execute(&mut self, command: Command, mode: Mode) -> Response {
        if mode == Mode::Live && command.is_mutation() {
            // Log before apply: a crash in between is repaired by replay.
            if let Err(err) = self.log.append(&command.to_string()) {
                error!(command = %command, error = %err, "AOF append failed, command aborted");
                return Response::error(format!("persistence failure: {}", err));
            }
        }

        match command {
            Command::SetCheckpoint {
                pipeline,
                value,
                ttl,
            } => {
                self.store
                    .set_checkpoint(pipeline, value, ttl.map(ttl_duration));
                Response::Ok
            }
            Command::GetCheckpoint { pipeline } => match self.store.get_checkpoint(&pipeline) {
                Some(value) => Response::Value(value),
                None => Response::Null,
            },
            Command::Compact if mode == Mode::Replay => Response::Ok,
            Command::Compact => {
                let snapshot = self.store.dump_checkpoints();
                match self.log.rewrite(&snapshot) {
                    Ok(()) => Response::Ok,
                    Err(err) => {
                        error!(error = %err, "AOF rewrite failed");
                        Response::error(format!("compaction failed: {}", err))
                    }
                }
            }
        }
    }
}
