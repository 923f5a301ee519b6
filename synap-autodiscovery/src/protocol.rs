//! Text protocol framing for discovery operations
//!
//! Only covers what auto discovery needs:
//! - `stats` → `STAT <name> <value>` lines terminated by `END`
//! - `gets <key>` → `VALUE <key> <flags> <bytes> [<cas>]` + data + `END`
//! - `config get <key>` → `CONFIG <key> <flags> <bytes>` + data + `END`
//! - `version` → `VERSION <version>`

use crate::node::{Operation, OperationData, OperationResult};
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const TERMINATOR: &str = "\r\n";

/// Largest payload accepted in a VALUE/CONFIG block
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Largest header or STAT line accepted
const MAX_LINE_BYTES: u64 = 8 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Connection closed")]
    Closed,
}

/// Encode an operation as a command line
pub fn encode(op: &Operation) -> Vec<u8> {
    let command = match op {
        Operation::Stats => "stats".to_string(),
        Operation::Gets { key } => format!("gets {}", key),
        Operation::ConfigGet { key } => format!("config get {}", key),
        Operation::Version => "version".to_string(),
    };

    format!("{}{}", command, TERMINATOR).into_bytes()
}

/// Read the full response to `op` from `reader`
pub async fn read_response<R>(op: &Operation, reader: &mut R) -> Result<OperationResult, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;

    if let Some(failure) = server_error(&line) {
        return Ok(failure);
    }

    match op {
        Operation::Stats => read_stats(line, reader).await,
        Operation::Gets { .. } => read_item(&line, "VALUE", reader).await,
        Operation::ConfigGet { .. } => read_item(&line, "CONFIG", reader).await,
        Operation::Version => match line.strip_prefix("VERSION ") {
            Some(version) => Ok(OperationResult::pass(OperationData::Version(
                version.trim().to_string(),
            ))),
            None => Err(ProtocolError::Malformed(format!(
                "expected VERSION, got {:?}",
                line
            ))),
        },
    }
}

async fn read_line<R>(reader: &mut R) -> Result<String, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(ProtocolError::Closed);
    }
    if n as u64 >= MAX_LINE_BYTES && !line.ends_with('\n') {
        return Err(ProtocolError::Malformed(format!(
            "response line exceeds {} bytes",
            MAX_LINE_BYTES
        )));
    }

    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn server_error(line: &str) -> Option<OperationResult> {
    if line == "ERROR" {
        return Some(OperationResult::fail("ERROR"));
    }

    ["CLIENT_ERROR", "SERVER_ERROR"]
        .iter()
        .find(|prefix| line.starts_with(*prefix))
        .map(|_| OperationResult::fail(line.to_string()))
}

async fn read_stats<R>(first: String, reader: &mut R) -> Result<OperationResult, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = HashMap::new();
    let mut line = first;

    while line != "END" {
        let mut parts = line.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("STAT"), Some(name), value) => {
                stats.insert(name.to_string(), value.unwrap_or_default().to_string());
            }
            _ => {
                return Err(ProtocolError::Malformed(format!(
                    "expected STAT, got {:?}",
                    line
                )));
            }
        }
        line = read_line(reader).await?;
    }

    Ok(OperationResult::pass(OperationData::Stats(stats)))
}

async fn read_item<R>(
    header: &str,
    expected: &str,
    reader: &mut R,
) -> Result<OperationResult, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    if header == "END" {
        return Ok(OperationResult::fail("Failed to read response"));
    }

    // <KIND> <key> <flags> <bytes> [<cas unique>]
    let parts: Vec<&str> = header.split(' ').collect();
    if parts.len() < 4 || parts[0] != expected {
        return Err(ProtocolError::Malformed(format!(
            "no {} response received: {:?}",
            expected, header
        )));
    }

    let flags = parts[2]
        .parse::<u32>()
        .map_err(|_| ProtocolError::Malformed(format!("invalid flags: {}", parts[2])))?;
    let length = parts[3]
        .parse::<usize>()
        .map_err(|_| ProtocolError::Malformed(format!("invalid length: {}", parts[3])))?;
    let cas = match parts.get(4) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ProtocolError::Malformed(format!("invalid CAS value: {}", raw)))?,
        None => 0,
    };

    if length > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::Malformed(format!(
            "payload of {} bytes exceeds limit",
            length
        )));
    }

    let mut data = vec![0u8; length];
    reader.read_exact(&mut data).await?;

    let mut eod = [0u8; 2];
    reader.read_exact(&mut eod).await?;
    if &eod != b"\r\n" {
        return Err(ProtocolError::Malformed(
            "data block not terminated".to_string(),
        ));
    }

    let end = read_line(reader).await?;
    if end != "END" {
        return Err(ProtocolError::Malformed("no END was received".to_string()));
    }

    Ok(OperationResult::pass(OperationData::Value {
        flags,
        cas,
        data: Bytes::from(data),
    }))
}
