//! The TCP front end: listener and per-connection command loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::broker::Broker;
use crate::codec::{FrameReader, Pack};
use crate::parser::{self, ParseError};
use crate::types::protocol::{Reply, Request};

/// Upper bound on how long a parked RESERVE waits before re-polling. The
/// ready notification wakes it sooner; this only bounds a lost wakeup.
const RESERVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Server tunables, filled in from the command line by the binary.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Largest ADD payload accepted, in bytes.
    pub max_job_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_job_size: 65535,
        }
    }
}

/// A broker bound to a TCP socket.
pub struct Server {
    listener: TcpListener,
    broker: Arc<Broker>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("binding listener")?;
        Ok(Self {
            listener,
            broker: Arc::new(Broker::new()),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("reading local address")
    }

    /// The store this server fronts.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Accepts connections until `cancel` fires, spawning a handler task per
    /// connection. Handlers hold a clone of `shutdown_hold`, so the process
    /// can wait on the paired receiver for them to drain.
    pub async fn run(
        self,
        cancel: CancellationToken,
        shutdown_hold: mpsc::Sender<()>,
    ) -> Result<()> {
        info!(addr = %self.local_addr()?, "listening");

        loop {
            let (conn, peer) = match select! {
                accept = self.listener.accept() => accept,
                _ = cancel.cancelled() => break,
            } {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "failed to accept connection");
                    continue;
                }
            };

            tokio::spawn(handle(
                cancel.clone(),
                shutdown_hold.clone(),
                Arc::clone(&self.broker),
                self.config.clone(),
                conn,
                peer,
            ));
        }

        Ok(())
    }
}

#[instrument(name = "conn", err, skip_all, fields(peer = %peer))]
async fn handle(
    cancel: CancellationToken,
    _shutdown_hold: mpsc::Sender<()>,
    broker: Arc<Broker>,
    config: ServerConfig,
    conn: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    debug!("accepted connection");

    conn.set_nodelay(true).context("setting NODELAY")?;
    let (read, write) = conn.into_split();

    let mut conn = Conn {
        reader: read.into(),
        writer: write,
        broker,
        config,
        cancel,
    };
    let ret = conn.run().await;

    conn.writer.shutdown().await.context("during shutdown")?;
    debug!("closed connection");

    ret
}

struct Conn {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    broker: Arc<Broker>,
    config: ServerConfig,
    cancel: CancellationToken,
}

impl Conn {
    /// Serves commands until the peer hangs up, the verb stream breaks, or
    /// the server shuts down. One command runs to completion, reply
    /// included, before the next is read, so replies keep request order.
    async fn run(&mut self) -> Result<()> {
        loop {
            let req = select! {
                r = parser::read_request(&mut self.reader) => r,
                _ = self.cancel.cancelled() => return Ok(()),
            };

            let req = match req {
                Ok(Some(req)) => req,
                Ok(None) => return Ok(()),
                Err(ParseError::UnknownCommand(verb)) => {
                    self.send(&Reply::Error(format!("Unknown Command {verb}")))
                        .await?;
                    continue;
                }
                Err(error @ ParseError::Field { .. }) => {
                    self.send(&Reply::Error(error.to_string())).await?;
                    continue;
                }
                Err(ParseError::Verb(error)) => {
                    warn!(%error, "could not read a command verb");
                    return Ok(());
                }
            };

            trace!(?req, "processing command");
            match req {
                Request::Connect => self.send(&Reply::Ok).await?,
                Request::Add {
                    queue,
                    priority,
                    timeout,
                    data,
                } => self.handle_add(queue, priority, timeout, data).await?,
                Request::Reserve {
                    queue,
                    timeout_secs,
                } => self.handle_reserve(queue, timeout_secs).await?,
                Request::Delete { id } => self.handle_delete(id).await?,
            }
        }
    }

    async fn handle_add(
        &mut self,
        queue: String,
        priority: u32,
        timeout: u32,
        data: Bytes,
    ) -> Result<()> {
        if data.len() > self.config.max_job_size as usize {
            let msg = format!(
                "job data of {} bytes exceeds the {}-byte limit",
                data.len(),
                self.config.max_job_size
            );
            debug!(%msg, "rejected ADD");
            return self.send(&Reply::Error(msg)).await;
        }

        let reply = match self.broker.add_job(&queue, priority, timeout, data) {
            Ok(id) => Reply::Added(id),
            Err(error) => {
                debug!(%error, "rejected ADD");
                Reply::Error(error.to_string())
            }
        };
        self.send(&reply).await
    }

    /// Blocks this connection (and only this connection) until a job can be
    /// reserved or the client-supplied timeout passes. Zero means wait
    /// forever, including on a queue nothing has referenced before.
    async fn handle_reserve(&mut self, queue_name: String, timeout_secs: u32) -> Result<()> {
        let queue = self.broker.queue(&queue_name);
        let deadline =
            (timeout_secs > 0).then(|| time::Instant::now() + Duration::from_secs(timeout_secs.into()));

        loop {
            if let Some(job) = queue.reserve() {
                return self.send(&Reply::Reserved(job)).await;
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = time::Instant::now();
                    if now >= deadline {
                        return self.send(&Reply::Timeout).await;
                    }
                    RESERVE_POLL_INTERVAL.min(deadline - now)
                }
                None => RESERVE_POLL_INTERVAL,
            };

            select! {
                _ = queue.ready_signal() => {}
                _ = time::sleep(wait) => {}
                _ = self.cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn handle_delete(&mut self, id: u64) -> Result<()> {
        let reply = match self.broker.delete_job(id) {
            Ok(()) => Reply::Ok,
            Err(error) => {
                debug!(%error, "rejected DELETE");
                Reply::Error(error.to_string())
            }
        };
        self.send(&reply).await
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        let mut buf = BytesMut::new();
        reply.pack(&mut buf).context("encoding reply")?;

        // Written with cancel safety: on shutdown we stop mid-write and the
        // connection is torn down rather than left half-framed.
        select! {
            r = self.writer.write_all_buf(&mut buf) => r.context("writing reply")?,
            _ = self.cancel.cancelled() => {}
        }
        Ok(())
    }
}
