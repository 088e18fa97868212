//! The process-wide registry of named queues and live jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

use crate::queue::status_queue::StatusQueue;
use crate::types::job::{Job, JobData};

/// Errors a client can recover from. Anything else that goes wrong in the
/// store is an invariant violation and panics instead.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum BrokerError {
    #[error("cannot add a job to a queue with no name")]
    EmptyQueueName,
    #[error("unknown job id {0}")]
    UnknownJob(u64),
}

/// One named queue plus the notifier that wakes reservers parked on it.
pub struct NamedQueue {
    state: Mutex<StatusQueue>,
    notify_ready: Notify,
}

impl NamedQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(StatusQueue::new()),
            notify_ready: Notify::new(),
        }
    }

    /// Reserves the highest-priority ready job, if any.
    pub fn reserve(&self) -> Option<JobData> {
        self.state.lock().reserve(unix_now())
    }

    /// Completes once a job may have entered the ready list since the call.
    /// Wakeups can be spurious or missed; callers re-poll on a cadence.
    pub async fn ready_signal(&self) {
        self.notify_ready.notified().await;
    }
}

/// The single owner of every queue and job in the process.
///
/// Locking: each queue has one mutex over its lists and records, and the id
/// index (with the id counter) has its own. The add path takes the queue
/// mutex first and the index mutex inside it, so an id never appears in the
/// index before its job is in the queue; no path acquires them in the other
/// order while holding both.
///
/// Reservation expiries are recorded on each job but nothing reclaims them:
/// a job whose reserver disappears stays reserved until it is deleted.
pub struct Broker {
    queues: RwLock<HashMap<String, Arc<NamedQueue>>>,
    index: Mutex<JobIndex>,
}

struct JobIndex {
    /// Which queue holds each live job. Membership here is the authoritative
    /// does-this-job-exist check.
    jobs: HashMap<u64, Arc<NamedQueue>>,
    next_id: u64,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            index: Mutex::new(JobIndex {
                jobs: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Looks up a queue, creating it on first reference.
    pub fn queue(&self, name: &str) -> Arc<NamedQueue> {
        if let Some(queue) = self.queues.read().get(name) {
            return Arc::clone(queue);
        }

        let mut queues = self.queues.write();
        Arc::clone(
            queues
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(NamedQueue::new())),
        )
    }

    /// Admits a job to the named queue and returns its id. Ids start at 1
    /// and are handed out in admission order, never recycled.
    pub fn add_job(
        &self,
        queue_name: &str,
        priority: u32,
        reservation_timeout: u32,
        data: Bytes,
    ) -> Result<u64, BrokerError> {
        if queue_name.is_empty() {
            return Err(BrokerError::EmptyQueueName);
        }

        let queue = self.queue(queue_name);
        let mut state = queue.state.lock();

        let id = {
            let mut index = self.index.lock();
            let id = index.next_id;
            index.next_id += 1;
            index.jobs.insert(id, Arc::clone(&queue));
            id
        };

        state.add(Job::new(
            id,
            queue_name.to_owned(),
            priority,
            reservation_timeout,
            data,
        ));
        drop(state);

        queue.notify_ready.notify_waiters();
        Ok(id)
    }

    /// Reserves the highest-priority ready job of the named queue.
    pub fn reserve_job(&self, queue_name: &str) -> Option<JobData> {
        self.queue(queue_name).reserve()
    }

    /// Deletes a job in whatever status it is in. A second delete of the
    /// same id fails: ids leave the index exactly once.
    pub fn delete_job(&self, id: u64) -> Result<(), BrokerError> {
        let queue = self
            .index
            .lock()
            .jobs
            .remove(&id)
            .ok_or(BrokerError::UnknownJob(id))?;

        if queue.state.lock().delete(id).is_none() {
            // Index removal won against a delete that had already unlinked.
            debug!(id, "job left its queue before the unlink");
        }
        Ok(())
    }

    /// Snapshot of a live job by id.
    pub fn job_data(&self, id: u64) -> Option<JobData> {
        let queue = Arc::clone(self.index.lock().jobs.get(&id)?);
        let data = queue.state.lock().job_data(id);
        data
    }

    /// Number of live jobs across every queue, for tests and diagnostics.
    pub fn num_jobs(&self) -> usize {
        self.index.lock().jobs.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::thread;

    use crate::types::status::JobStatus;

    fn payload() -> Bytes {
        Bytes::from_static(b"234")
    }

    #[test]
    fn test_empty_broker() {
        let broker = Broker::new();
        assert_eq!(broker.reserve_job("queue1"), None);
        assert_eq!(broker.job_data(1), None);
        assert_eq!(broker.num_jobs(), 0);
    }

    #[test]
    fn test_add_requires_queue_name() {
        let broker = Broker::new();
        assert_eq!(
            broker.add_job("", 5, 60, payload()),
            Err(BrokerError::EmptyQueueName)
        );
    }

    #[test]
    fn test_single_job_lifecycle() {
        let broker = Broker::new();

        let id = broker.add_job("queue1", 5, 60, payload()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(broker.num_jobs(), 1);

        let stored = broker.job_data(1).unwrap();
        assert_eq!(stored.id, 1);
        assert_eq!(stored.queue, "queue1");
        assert_eq!(stored.status, JobStatus::Ready);
        assert_eq!(stored.data, payload());

        let reserved = broker.reserve_job("queue1").unwrap();
        assert_eq!(reserved.id, 1);
        assert_eq!(reserved.status, JobStatus::Reserved);
        assert_eq!(reserved.data, payload());

        broker.delete_job(1).unwrap();
        assert_eq!(broker.job_data(1), None);
        assert_eq!(broker.reserve_job("queue1"), None);
        assert_eq!(broker.delete_job(1), Err(BrokerError::UnknownJob(1)));
        assert_eq!(broker.num_jobs(), 0);
    }

    #[test]
    fn test_ids_are_contiguous_and_priority_orders_reserves() {
        let broker = Broker::new();

        for (i, priority) in [2, 1, 4, 1, 2, 3].into_iter().enumerate() {
            let id = broker.add_job("queue1", priority, 60, payload()).unwrap();
            assert_eq!(id, i as u64 + 1);
        }

        for want in [2, 4, 1, 5, 6, 3] {
            let job = broker.reserve_job("queue1").expect("a job should be ready");
            assert_eq!(job.id, want);
            assert_eq!(job.status, JobStatus::Reserved);
        }
    }

    #[test]
    fn test_queues_are_isolated() {
        let broker = Broker::new();

        for (i, priority) in [2, 1, 1, 4, 2, 3].into_iter().enumerate() {
            let queue = if i % 2 == 0 { "queue2" } else { "queue1" };
            broker.add_job(queue, priority, 60, payload()).unwrap();
        }

        for (i, want) in [3, 2, 1, 6, 5, 4].into_iter().enumerate() {
            let queue = if i % 2 == 0 { "queue2" } else { "queue1" };
            let job = broker.reserve_job(queue).expect("a job should be ready");
            assert_eq!(job.id, want);
        }
    }

    #[test]
    fn test_reserved_jobs_are_deletable() {
        let broker = Broker::new();
        broker.add_job("queue1", 1, 60, payload()).unwrap();
        broker.reserve_job("queue1").unwrap();

        broker.delete_job(1).unwrap();
        assert_eq!(broker.num_jobs(), 0);
    }

    #[test]
    fn test_concurrent_add_reserve_delete() {
        let broker = Arc::new(Broker::new());
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let adders: Vec<_> = (0..2)
            .map(|_| {
                let broker = Arc::clone(&broker);
                thread::spawn(move || {
                    for i in 0..10u32 {
                        broker
                            .add_job("queueA", i % 2, 60, payload())
                            .expect("add should succeed");
                    }
                })
            })
            .collect();

        let reservers: Vec<_> = (0..2)
            .map(|_| {
                let broker = Arc::clone(&broker);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let job = loop {
                            match broker.reserve_job("queueA") {
                                Some(job) => break job,
                                None => thread::yield_now(),
                            }
                        };
                        assert!(
                            seen.lock().insert(job.id),
                            "job {} reserved twice",
                            job.id
                        );
                        broker.delete_job(job.id).expect("delete should succeed");
                    }
                })
            })
            .collect();

        for handle in adders.into_iter().chain(reservers) {
            handle.join().unwrap();
        }

        assert_eq!(broker.num_jobs(), 0);
        assert_eq!(seen.lock().len(), 20);
    }
}
