//! CheckVault - a durable checkpoint store for data pipelines
//!
//! Pipelines record their last processed position under their own name and
//! read it back after a restart. This library provides:
//! - a line-oriented TCP protocol (`SET_CHECKPOINT`, `GET_CHECKPOINT`, `COMPACT`)
//! - an in-memory store with lazy per-entry expiry
//! - an append-only file for crash recovery, with atomic compaction
//! - a single-threaded connection multiplexer
//! - a client library for pipelines

pub mod aof;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod orders;
pub mod protocol;
pub mod server;
pub mod store;

pub use aof::AppendOnlyLog;
pub use client::Client;
pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, Mode, ReplayStats};
pub use error::{CheckVaultError, ProtocolError, Result};
pub use protocol::{Command, Response};
pub use server::{CheckpointServer, ShutdownHandle};
pub use store::{MemoryStore, Store};
