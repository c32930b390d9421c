//! Line protocol for CheckVault
//!
//! One command per line, whitespace separated tokens, one response per line.
//! Tokenisation is done with nom; arity and argument checks happen on the
//! token slice.

use crate::error::ProtocolError;
use nom::{
    bytes::complete::{take_while, take_while1},
    combinator::all_consuming,
    multi::separated_list1,
    sequence::delimited,
    IResult,
};
use std::fmt;
use std::time::Duration;

pub const SET_CHECKPOINT: &str = "SET_CHECKPOINT";
pub const GET_CHECKPOINT: &str = "GET_CHECKPOINT";
pub const COMPACT: &str = "COMPACT";

/// Commands supported by the CheckVault protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetCheckpoint {
        pipeline: String,
        value: String,
        ttl: Option<i64>,
    },
    GetCheckpoint {
        pipeline: String,
    },
    Compact,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetCheckpoint { .. } => SET_CHECKPOINT,
            Command::GetCheckpoint { .. } => GET_CHECKPOINT,
            Command::Compact => COMPACT,
        }
    }

    /// Whether the command changes state and therefore belongs in the AOF.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Command::SetCheckpoint { .. })
    }
}

/// Renders the normalised command line, without the trailing newline. This
/// is also the AOF record format.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetCheckpoint {
                pipeline,
                value,
                ttl: Some(ttl),
            } => write!(f, "{} {} {} {}", SET_CHECKPOINT, pipeline, value, ttl),
            Command::SetCheckpoint {
                pipeline,
                value,
                ttl: None,
            } => write!(f, "{} {} {}", SET_CHECKPOINT, pipeline, value),
            Command::GetCheckpoint { pipeline } => write!(f, "{} {}", GET_CHECKPOINT, pipeline),
            Command::Compact => f.write_str(COMPACT),
        }
    }
}

/// Response types from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Value(String),
    Null,
    Error(String),
}

impl Response {
    pub fn error(reason: impl fmt::Display) -> Self {
        Response::Error(reason.to_string())
    }

    /// Serialize response to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(b'\n');
        bytes
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => f.write_str("OK"),
            Response::Value(v) => f.write_str(v),
            Response::Null => f.write_str("NULL"),
            Response::Error(e) => write!(f, "ERROR {}", e),
        }
    }
}

/// Converts a wire ttl into a duration. Non-positive ttls expire immediately.
pub fn ttl_duration(ttl: i64) -> Duration {
    Duration::from_secs(u64::try_from(ttl).unwrap_or(0))
}

/// Parse one command line. A trailing `\r` or `\n` is tolerated.
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (_, tokens) = tokens(line).map_err(|_| ProtocolError::Empty)?;

    match tokens.as_slice() {
        [SET_CHECKPOINT, pipeline, value] => Ok(Command::SetCheckpoint {
            pipeline: pipeline.to_string(),
            value: value.to_string(),
            ttl: None,
        }),
        [SET_CHECKPOINT, pipeline, value, ttl] => {
            let ttl = ttl
                .parse::<i64>()
                .map_err(|_| ProtocolError::InvalidTtl(ttl.to_string()))?;
            Ok(Command::SetCheckpoint {
                pipeline: pipeline.to_string(),
                value: value.to_string(),
                ttl: Some(ttl),
            })
        }
        [SET_CHECKPOINT, ..] => Err(ProtocolError::WrongArity(SET_CHECKPOINT)),
        [GET_CHECKPOINT, pipeline] => Ok(Command::GetCheckpoint {
            pipeline: pipeline.to_string(),
        }),
        [GET_CHECKPOINT, ..] => Err(ProtocolError::WrongArity(GET_CHECKPOINT)),
        [COMPACT] => Ok(Command::Compact),
        [COMPACT, ..] => Err(ProtocolError::WrongArity(COMPACT)),
        _ => Err(ProtocolError::UnknownCommand),
    }
}

/// Whether `token` can travel as a single protocol argument.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(char::is_whitespace)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn gap(input: &str) -> IResult<&str, &str> {
    take_while1(char::is_whitespace)(input)
}

fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(delimited(
        take_while(char::is_whitespace),
        separated_list1(gap, token),
        take_while(char::is_whitespace),
    ))(input)
}
