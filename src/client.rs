//! Client library for CheckVault
//!
//! Every call opens a fresh connection, sends one command line, reads one
//! response line and closes the connection.

use crate::error::{CheckVaultError, Result};
use crate::protocol::{is_valid_token, Command};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Client for a CheckVault server
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Last checkpoint stored for `pipeline`, if any.
    pub async fn get_checkpoint(&self, pipeline: &str) -> Result<Option<String>> {
        check_token("pipeline", pipeline)?;
        let command = Command::GetCheckpoint {
            pipeline: pipeline.to_string(),
        };

        let response = self.send_command(&command).await?;
        if response == "NULL" {
            Ok(None)
        } else if let Some(reason) = response.strip_prefix("ERROR ") {
            Err(CheckVaultError::Server(reason.to_string()))
        } else {
            Ok(Some(response))
        }
    }

    /// Store `value` as the checkpoint of `pipeline`, optionally expiring
    /// after `ttl` seconds.
    pub async fn set_checkpoint(&self, pipeline: &str, value: &str, ttl: Option<i64>) -> Result<()> {
        check_token("pipeline", pipeline)?;
        check_token("value", value)?;
        let command = Command::SetCheckpoint {
            pipeline: pipeline.to_string(),
            value: value.to_string(),
            ttl,
        };

        let response = self.send_command(&command).await?;
        expect_ok(&command, response)
    }

    /// Ask the server to compact its append-only file.
    pub async fn compact(&self) -> Result<()> {
        let response = self.send_command(&Command::Compact).await?;
        expect_ok(&Command::Compact, response)
    }

    async fn send_command(&self, command: &Command) -> Result<String> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();

        writer
            .write_all(format!("{}\n", command).as_bytes())
            .await?;
        writer.flush().await?;

        let mut response = String::new();
        let read = BufReader::new(reader).read_line(&mut response).await?;
        if read == 0 {
            return Err(CheckVaultError::Client(format!(
                "connection closed before {} response",
                command.name()
            )));
        }

        Ok(response.trim_end_matches(['\r', '\n']).to_string())
    }
}

fn check_token(name: &str, token: &str) -> Result<()> {
    if is_valid_token(token) {
        Ok(())
    } else {
        Err(CheckVaultError::InvalidArgument(format!(
            "{} must be non-empty and contain no whitespace, got {:?}",
            name, token
        )))
    }
}

fn expect_ok(command: &Command, response: String) -> Result<()> {
    if response == "OK" {
        Ok(())
    } else if let Some(reason) = response.strip_prefix("ERROR ") {
        Err(CheckVaultError::Server(reason.to_string()))
    } else {
        Err(CheckVaultError::Client(format!(
            "unexpected response to {}: {}",
            command.name(),
            response
        )))
    }
}
