//! Minimal RESP2 codec: enough to authenticate, select, ping, and read INFO.
//!
//! Commands are sent as RESP arrays of bulk strings:
//!
//! ```text
//! *2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n
//! ```

use std::io::BufRead;

use thiserror::Error;

/// Upper bound for a single bulk reply. INFO output is a few KiB.
const MAX_BULK_LEN: usize = 16 * 1024 * 1024;

/// Deepest array nesting accepted. Replies to the commands sent here are flat.
const MAX_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum RespError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Text of a simple or bulk string reply.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Reply::Simple(s) => Some(s.clone()),
            Reply::Bulk(Some(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read one complete reply.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply, RespError> {
    read_nested(reader, 0)
}

fn read_nested<R: BufRead>(reader: &mut R, depth: usize) -> Result<Reply, RespError> {
    let line = read_line(reader)?;
    let (tag, rest) = line
        .split_at_checked(1)
        .ok_or_else(|| RespError::Protocol("empty reply line".to_string()))?;

    match tag {
        "+" => Ok(Reply::Simple(rest.to_string())),
        "-" => Ok(Reply::Error(rest.to_string())),
        ":" => parse_int(rest).map(Reply::Integer),
        "$" => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(RespError::Protocol(format!("bulk reply of {len} bytes")));
            }
            let mut buf = vec![0u8; len + 2];
            reader.read_exact(&mut buf)?;
            if &buf[len..] != b"\r\n" {
                return Err(RespError::Protocol("bulk reply missing terminator".to_string()));
            }
            buf.truncate(len);
            Ok(Reply::Bulk(Some(buf)))
        }
        "*" => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(Reply::Array(None));
            }
            if depth >= MAX_DEPTH {
                return Err(RespError::Protocol(format!(
                    "arrays nested deeper than {MAX_DEPTH}"
                )));
            }
            let mut items = Vec::with_capacity(len.min(64) as usize);
            for _ in 0..len {
                items.push(read_nested(reader, depth + 1)?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(RespError::Protocol(format!("unexpected reply type {other:?}"))),
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, RespError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(RespError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )));
    }
    let trimmed = line
        .strip_suffix("\r\n")
        .ok_or_else(|| RespError::Protocol("reply line missing CRLF".to_string()))?;
    Ok(trimmed.to_string())
}

fn parse_int(raw: &str) -> Result<i64, RespError> {
    raw.parse()
        .map_err(|_| RespError::Protocol(format!("invalid integer {raw:?}")))
}

/// Statistics pulled from an `INFO` reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub memory_used_mb: Option<u64>,
    pub connected_clients: Option<u64>,
    /// Keys summed over every `dbN` keyspace line.
    pub keys_count: Option<u64>,
}

pub fn parse_info(info: &str) -> ServerStats {
    let mut stats = ServerStats::default();
    let mut keys: Option<u64> = None;

    for line in info.lines() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        match field {
            "used_memory" => {
                stats.memory_used_mb = value.trim().parse::<u64>().ok().map(|b| b / (1024 * 1024));
            }
            "connected_clients" => stats.connected_clients = value.trim().parse().ok(),
            db if db.starts_with("db") && db[2..].chars().all(|c| c.is_ascii_digit()) => {
                // db0:keys=12,expires=0,avg_ttl=0
                let count = value
                    .split(',')
                    .find_map(|kv| kv.strip_prefix("keys="))
                    .and_then(|n| n.trim().parse::<u64>().ok());
                if let Some(count) = count {
                    keys = Some(keys.unwrap_or(0) + count);
                }
            }
            _ => {}
        }
    }

    stats.keys_count = keys;
    stats
}
