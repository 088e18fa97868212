//! Incremental decoding of client commands off a connection.
//!
//! A command is a verb followed by verb-specific fields, all read directly
//! from the stream. The two failure levels matter to the caller: a verb that
//! won't parse means the connection can't be resynchronised and should be
//! closed, while a bad field inside a known command is reported to the
//! client and the connection carries on.

use thiserror::Error;
use tokio::io::AsyncRead;

use crate::codec::{FrameError, FrameReader};
use crate::types::protocol::Request;

#[derive(Error, Debug)]
pub enum ParseError {
    /// The verb itself was unreadable; close the connection.
    #[error("failed to read command verb")]
    Verb(#[source] FrameError),
    /// A field inside a known command was unreadable.
    #[error("Malformed {verb} command: failed to parse {field}")]
    Field {
        verb: &'static str,
        field: &'static str,
        #[source]
        source: FrameError,
    },
    /// The verb parsed cleanly but names no command we serve.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
}

fn field<T>(
    res: Result<T, FrameError>,
    verb: &'static str,
    field: &'static str,
) -> Result<T, ParseError> {
    res.map_err(|source| ParseError::Field {
        verb,
        field,
        source,
    })
}

/// Reads one command. `Ok(None)` is a clean hang-up between commands.
pub async fn read_request<T: AsyncRead + Unpin>(
    r: &mut FrameReader<T>,
) -> Result<Option<Request>, ParseError> {
    let verb = match r.read_verb().await {
        Ok(None) => return Ok(None),
        Ok(Some(verb)) => verb,
        Err(e) => return Err(ParseError::Verb(e)),
    };

    let req = match verb.as_str() {
        "CONNECT" => Request::Connect,
        "ADD" => {
            let queue = field(r.read_string().await, "ADD", "queue name")?;
            let priority = field(r.read_u32().await, "ADD", "priority")?;
            let timeout = field(r.read_u32().await, "ADD", "timeout")?;
            let data = field(r.read_blob().await, "ADD", "job data")?;
            Request::Add {
                queue: String::from_utf8_lossy(&queue).into_owned(),
                priority,
                timeout,
                data,
            }
        }
        "RESERVE" => {
            let queue = field(r.read_string().await, "RESERVE", "queue name")?;
            let timeout_secs = field(r.read_u32().await, "RESERVE", "timeout")?;
            Request::Reserve {
                queue: String::from_utf8_lossy(&queue).into_owned(),
                timeout_secs,
            }
        }
        "DELETE" => Request::Delete {
            id: field(r.read_u64().await, "DELETE", "job ID")?,
        },
        _ => return Err(ParseError::UnknownCommand(verb)),
    };

    Ok(Some(req))
}
