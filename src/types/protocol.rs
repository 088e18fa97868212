use bytes::{Bytes, BytesMut};

use crate::codec::{self, FrameError, Pack};
use crate::types::job::JobData;

/// A command sent by a client to the broker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    /// `CONNECT`, the handshake; answered with `OK`.
    Connect,
    /// `ADD <queue> <priority> <timeout> <data>`
    Add {
        queue: String,
        priority: u32,
        timeout: u32,
        data: Bytes,
    },
    /// `RESERVE <queue> <timeout_secs>`: blocks until a job is ready or
    /// `timeout_secs` have passed; zero waits forever.
    Reserve { queue: String, timeout_secs: u32 },
    /// `DELETE <id>`
    Delete { id: u64 },
}

impl Pack for Request {
    fn pack(&self, buf: &mut BytesMut) -> Result<(), FrameError> {
        match self {
            Request::Connect => codec::pack_str(buf, "CONNECT"),
            Request::Add {
                queue,
                priority,
                timeout,
                data,
            } => {
                codec::pack_str(buf, "ADD");
                codec::pack_str(buf, queue);
                codec::pack_u32(buf, *priority);
                codec::pack_u32(buf, *timeout);
                codec::pack_blob(buf, data)?;
            }
            Request::Reserve {
                queue,
                timeout_secs,
            } => {
                codec::pack_str(buf, "RESERVE");
                codec::pack_str(buf, queue);
                codec::pack_u32(buf, *timeout_secs);
            }
            Request::Delete { id } => {
                codec::pack_str(buf, "DELETE");
                codec::pack_u64(buf, *id);
            }
        }
        Ok(())
    }
}

/// A reply sent by the broker to a client.
#[derive(Clone, Debug)]
pub enum Reply {
    Ok,
    Added(u64),
    Reserved(JobData),
    Timeout,
    Error(String),
}

impl Pack for Reply {
    fn pack(&self, buf: &mut BytesMut) -> Result<(), FrameError> {
        match self {
            Reply::Ok => codec::pack_str(buf, "OK"),
            Reply::Added(id) => {
                codec::pack_str(buf, "ADDED");
                codec::pack_u64(buf, *id);
            }
            Reply::Reserved(job) => {
                codec::pack_str(buf, "RESERVED");
                job.pack(buf)?;
            }
            Reply::Timeout => codec::pack_str(buf, "TIMEOUT"),
            Reply::Error(msg) => {
                codec::pack_str(buf, "ERROR");
                codec::pack_str(buf, msg);
            }
        }
        Ok(())
    }
}
