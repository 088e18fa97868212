//! A thin client for the broker protocol.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::{FrameError, FrameReader, Pack};
use crate::types::job::JobData;
use crate::types::protocol::Request;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered `TIMEOUT`: no job became ready in time.
    #[error("request timed out")]
    Timeout,
    /// The server answered `ERROR`.
    #[error("server error: {0}")]
    Server(String),
    /// The server answered something other than what the request expects.
    #[error("expected {expected} reply, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: String,
    },
    /// The server hung up.
    #[error("connection closed by server")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A connection to a broker.
///
/// Jobs are added to and reserved from the `"default"` queue until
/// [`Client::set_add_queue`] and [`Client::set_reserve_queue`] say
/// otherwise. One request is in flight at a time; a blocking reserve
/// blocks the whole client.
pub struct Client {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    add_queue: String,
    reserve_queue: String,
}

impl Client {
    /// Connects to a broker and performs the CONNECT handshake, so a
    /// returned client is known to be talking to the right protocol.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let conn = TcpStream::connect(addr).await?;
        let (read, write) = conn.into_split();

        let mut client = Self {
            reader: read.into(),
            writer: write,
            add_queue: "default".to_owned(),
            reserve_queue: "default".to_owned(),
        };
        client.request(&Request::Connect, "OK").await?;
        Ok(client)
    }

    /// Sets the queue that later [`Client::add_job`] calls target.
    pub fn set_add_queue(&mut self, queue: impl Into<String>) {
        self.add_queue = queue.into();
    }

    /// Sets the queue that later [`Client::reserve_job`] calls target.
    pub fn set_reserve_queue(&mut self, queue: impl Into<String>) {
        self.reserve_queue = queue.into();
    }

    /// Adds a job, returning the id the broker assigned it.
    pub async fn add_job(
        &mut self,
        priority: u32,
        reservation_timeout: u32,
        data: Bytes,
    ) -> Result<u64, ClientError> {
        let req = Request::Add {
            queue: self.add_queue.clone(),
            priority,
            timeout: reservation_timeout,
            data,
        };
        self.request(&req, "ADDED").await?;
        Ok(self.reader.read_u64().await?)
    }

    /// Reserves a job, waiting up to `timeout_secs` for one to be ready
    /// (zero waits forever). Times out as [`ClientError::Timeout`].
    pub async fn reserve_job(&mut self, timeout_secs: u32) -> Result<JobData, ClientError> {
        let req = Request::Reserve {
            queue: self.reserve_queue.clone(),
            timeout_secs,
        };
        self.request(&req, "RESERVED").await?;

        let mut job = JobData::read(&mut self.reader).await?;
        job.queue = self.reserve_queue.clone();
        Ok(job)
    }

    /// Deletes a job by id.
    pub async fn delete_job(&mut self, id: u64) -> Result<(), ClientError> {
        self.request(&Request::Delete { id }, "OK").await?;
        Ok(())
    }

    /// Sends a request and checks the reply verb against `expected`,
    /// leaving any reply payload in the reader for the caller.
    async fn request(&mut self, req: &Request, expected: &'static str) -> Result<(), ClientError> {
        let mut buf = BytesMut::new();
        req.pack(&mut buf)?;
        self.writer.write_all_buf(&mut buf).await?;

        let verb = self
            .reader
            .read_verb()
            .await?
            .ok_or(ClientError::Closed)?;
        match verb.as_str() {
            "ERROR" => {
                let msg = self.reader.read_string().await?;
                Err(ClientError::Server(
                    String::from_utf8_lossy(&msg).into_owned(),
                ))
            }
            "TIMEOUT" => Err(ClientError::Timeout),
            _ if verb == expected => Ok(()),
            _ => Err(ClientError::UnexpectedReply {
                expected,
                got: verb,
            }),
        }
    }
}
