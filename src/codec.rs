//! Framing primitives for the broker's binary protocol.
//!
//! Everything on the wire is a plain concatenation of three primitives with
//! no outer frame: NUL-terminated strings, little-endian fixed-width
//! integers, and blobs (a `u32` length followed by that many raw bytes).
//! Receivers must consume exactly the bytes each field requires.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Error, Debug)]
pub enum FrameError {
    /// The peer closed the stream partway through a field.
    #[error("connection closed mid-field")]
    UnexpectedEof,
    /// A command verb contained bytes outside `A-Z`.
    #[error("invalid command verb {0:?}")]
    InvalidVerb(String),
    /// A payload was too large for its u32 length prefix.
    #[error("payload of {0} bytes overflows the u32 length prefix")]
    BlobOverflow(usize),
    /// A job record carried a status name we don't recognise.
    #[error("unknown job status {0:?}")]
    UnknownStatus(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads protocol fields off a stream, buffering as little as possible.
///
/// The internal buffer accumulates via `read_buf` and is consumed with
/// `split_to`, so pipelined commands that arrive in one read are handed out
/// one field at a time without copying.
pub struct FrameReader<T: AsyncRead + Unpin> {
    buf: BytesMut,
    reader: T,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Reads a command verb: a non-empty NUL-terminated string of `A-Z`
    /// bytes. Returns `None` on a clean end-of-stream at a command boundary,
    /// which is how peers are expected to hang up.
    pub async fn read_verb(&mut self) -> Result<Option<String>, FrameError> {
        if self.buf.is_empty() && self.reader.read_buf(&mut self.buf).await? == 0 {
            return Ok(None);
        }

        let raw = self.read_string().await?;
        if raw.is_empty() || !raw.iter().all(u8::is_ascii_uppercase) {
            return Err(FrameError::InvalidVerb(
                String::from_utf8_lossy(&raw).into_owned(),
            ));
        }

        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Reads bytes up to a single `0x00` terminator, excluding it.
    pub async fn read_string(&mut self) -> Result<Bytes, FrameError> {
        // Remember how far we've scanned so pipelined reads stay
        // O(bytes_read) rather than rescanning the whole buffer.
        let mut scanned = 0;
        loop {
            if let Some(nul) = self.buf[scanned..].iter().position(|&b| b == 0) {
                let s = self.buf.split_to(scanned + nul + 1).freeze();
                return Ok(s.slice(..s.len() - 1));
            }

            scanned = self.buf.len();
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return Err(FrameError::UnexpectedEof);
            }
        }
    }

    pub async fn read_u32(&mut self) -> Result<u32, FrameError> {
        self.fill(4).await?;
        Ok(self.buf.get_u32_le())
    }

    pub async fn read_u64(&mut self) -> Result<u64, FrameError> {
        self.fill(8).await?;
        Ok(self.buf.get_u64_le())
    }

    /// Reads a length-prefixed blob. Buffer growth is bounded by the
    /// declared length, however large the prefix claims to be.
    pub async fn read_blob(&mut self) -> Result<Bytes, FrameError> {
        let len = self.read_u32().await? as usize;
        self.buf.reserve(len.saturating_sub(self.buf.len()));
        self.fill(len).await?;
        Ok(self.buf.split_to(len).freeze())
    }

    /// Buffers at least `n` bytes; end-of-stream before then is a short read.
    async fn fill(&mut self, n: usize) -> Result<(), FrameError> {
        while self.buf.len() < n {
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return Err(FrameError::UnexpectedEof);
            }
        }
        Ok(())
    }
}

impl<T: AsyncRead + Unpin> From<T> for FrameReader<T> {
    fn from(reader: T) -> Self {
        Self {
            buf: BytesMut::new(),
            reader,
        }
    }
}

/// Values with a wire encoding in the broker protocol.
pub trait Pack {
    /// Appends the encoding of `self` to `buf`. Fails only when a payload
    /// exceeds what a u32 length prefix can describe.
    fn pack(&self, buf: &mut BytesMut) -> Result<(), FrameError>;
}

pub fn pack_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

pub fn pack_u32(buf: &mut BytesMut, v: u32) {
    buf.put_u32_le(v);
}

pub fn pack_u64(buf: &mut BytesMut, v: u64) {
    buf.put_u64_le(v);
}

pub fn pack_blob(buf: &mut BytesMut, data: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(data.len()).map_err(|_| FrameError::BlobOverflow(data.len()))?;
    buf.put_u32_le(len);
    buf.put_slice(data);
    Ok(())
}
