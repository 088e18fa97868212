use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::codec::{self, FrameError, FrameReader, Pack};
use crate::types::status::JobStatus;

/// A unit of work held by the broker.
///
/// Identity fields (`id`, `queue_name`, `priority`, `reservation_timeout`,
/// `data`) never change after admission; `status` and `reserve_expires_at`
/// move together through the lifecycle. The owning queue serialises every
/// mutation, so the record carries no lock of its own.
#[derive(Debug)]
pub struct Job {
    id: u64,
    queue_name: String,
    priority: u32,
    reservation_timeout: u32,
    data: Bytes,
    status: JobStatus,
    reserve_expires_at: Option<u64>,
}

#[derive(Error, Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReservationError {
    #[error("job {0} is already reserved")]
    AlreadyReserved(u64),
    #[error("job {0} is not reserved")]
    NotReserved(u64),
}

impl Job {
    pub(crate) fn new(
        id: u64,
        queue_name: String,
        priority: u32,
        reservation_timeout: u32,
        data: Bytes,
    ) -> Self {
        Self {
            id,
            queue_name,
            priority,
            reservation_timeout,
            data,
            status: JobStatus::Ready,
            reserve_expires_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Unix time the current reservation lapses; `None` unless reserved.
    pub fn reserve_expires_at(&self) -> Option<u64> {
        self.reserve_expires_at
    }

    /// Claims the job until `now_unix + reservation_timeout`.
    pub fn reserve(&mut self, now_unix: u64) -> Result<(), ReservationError> {
        if self.status == JobStatus::Reserved {
            return Err(ReservationError::AlreadyReserved(self.id));
        }

        self.status = JobStatus::Reserved;
        self.reserve_expires_at = Some(now_unix + u64::from(self.reservation_timeout));
        Ok(())
    }

    /// Grants the current reserver a fresh timeout to finish the job.
    pub fn refresh(&mut self, now_unix: u64) -> Result<(), ReservationError> {
        if self.status != JobStatus::Reserved {
            return Err(ReservationError::NotReserved(self.id));
        }

        self.reserve_expires_at = Some(now_unix + u64::from(self.reservation_timeout));
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> JobData {
        JobData {
            id: self.id,
            queue: self.queue_name.clone(),
            priority: self.priority,
            reservation_timeout: self.reservation_timeout,
            status: self.status,
            data: self.data.clone(),
        }
    }
}

/// A point-in-time copy of a job, handed to clients and sent on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobData {
    pub id: u64,
    /// Not transmitted; the client fills this in from the queue it used.
    pub queue: String,
    pub priority: u32,
    pub reservation_timeout: u32,
    pub status: JobStatus,
    pub data: Bytes,
}

impl JobData {
    /// Reads a job record off the wire (the payload of a `RESERVED` reply).
    pub async fn read<T: AsyncRead + Unpin>(
        r: &mut FrameReader<T>,
    ) -> Result<Self, FrameError> {
        let id = r.read_u64().await?;
        let priority = r.read_u32().await?;
        let reservation_timeout = r.read_u32().await?;

        let status_name = r.read_string().await?;
        let status = JobStatus::from_wire(&status_name).ok_or_else(|| {
            FrameError::UnknownStatus(String::from_utf8_lossy(&status_name).into_owned())
        })?;

        let data = r.read_blob().await?;
        Ok(Self {
            id,
            queue: String::new(),
            priority,
            reservation_timeout,
            status,
            data,
        })
    }
}

impl Pack for JobData {
    fn pack(&self, buf: &mut BytesMut) -> Result<(), FrameError> {
        codec::pack_u64(buf, self.id);
        codec::pack_u32(buf, self.priority);
        codec::pack_u32(buf, self.reservation_timeout);
        codec::pack_str(buf, self.status.as_str());
        codec::pack_blob(buf, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job() {
        let job = Job::new(1, "queue1".into(), 2, 60, Bytes::from_static(b"234"));

        assert_eq!(job.id(), 1);
        assert_eq!(job.priority(), 2);
        assert_eq!(job.status(), JobStatus::Ready);
        assert_eq!(job.reserve_expires_at(), None);
        assert_eq!(&job.data[..], b"234");
    }

    #[test]
    fn test_reservation() {
        let mut job = Job::new(1, "queue1".into(), 2, 60, Bytes::from_static(b"234"));

        job.reserve(1_000).unwrap();
        assert_eq!(job.status(), JobStatus::Reserved);
        assert_eq!(job.reserve_expires_at(), Some(1_060));

        assert_eq!(
            job.reserve(1_001),
            Err(ReservationError::AlreadyReserved(1))
        );

        job.refresh(1_010).unwrap();
        assert_eq!(job.reserve_expires_at(), Some(1_070));
    }

    #[test]
    fn test_refresh_requires_reservation() {
        let mut job = Job::new(7, "queue1".into(), 2, 60, Bytes::from_static(b"234"));
        assert_eq!(job.refresh(1_000), Err(ReservationError::NotReserved(7)));
    }

    #[tokio::test]
    async fn test_wire_round_trip() {
        let job = JobData {
            id: 9,
            queue: String::new(),
            priority: 3,
            reservation_timeout: 60,
            status: JobStatus::Reserved,
            data: Bytes::from_static(b"123"),
        };

        let mut buf = BytesMut::new();
        job.pack(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            b"\x09\x00\x00\x00\x00\x00\x00\x00\
              \x03\x00\x00\x00\
              \x3c\x00\x00\x00\
              reserved\x00\
              \x03\x00\x00\x00123"
        );

        let mut r: FrameReader<_> = (&buf[..]).into();
        assert_eq!(JobData::read(&mut r).await.unwrap(), job);
    }
}
