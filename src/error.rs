//! Error types for CheckVault

use std::io;
use thiserror::Error;

/// Result type alias for CheckVault operations
pub type Result<T> = std::result::Result<T, CheckVaultError>;

/// Custom error types for CheckVault
#[derive(Error, Debug)]
pub enum CheckVaultError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("AOF error: {0}")]
    Aof(String),
}

/// Reasons a command line is rejected. The `Display` text is what clients
/// see after `ERROR `.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("unknown command")]
    UnknownCommand,

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(&'static str),

    #[error("ttl must be an integer, got '{0}'")]
    InvalidTtl(String),

    #[error("command is not valid UTF-8")]
    InvalidUtf8,

    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}
