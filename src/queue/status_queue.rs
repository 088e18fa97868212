//! A named queue: job records plus one priority list per status.

use std::collections::HashMap;

use crate::queue::priority_list::PriorityList;
use crate::types::job::{Job, JobData};
use crate::types::status::JobStatus;

/// The jobs of one named queue, partitioned by status.
///
/// The broker guards each instance with a single lock, so every transition
/// here (including the two-list move a reservation makes) appears atomic to
/// other tasks: a job is never observable outside the list for its current
/// status.
#[derive(Debug, Default)]
pub struct StatusQueue {
    jobs: HashMap<u64, Job>,
    ready: PriorityList,
    reserved: PriorityList,
    delayed: PriorityList,
    buried: PriorityList,
}

impl StatusQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs across all four status lists.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Admits a freshly created job onto the ready list.
    pub fn add(&mut self, job: Job) {
        let id = job.id();
        assert_eq!(
            job.status(),
            JobStatus::Ready,
            "job {id} admitted with status {}",
            job.status()
        );

        self.ready.insert(job.priority(), id);
        let clash = self.jobs.insert(id, job);
        assert!(clash.is_none(), "job {id} admitted twice");
    }

    /// Moves the first ready job to `reserved` and returns its snapshot, or
    /// `None` when nothing is ready.
    pub fn reserve(&mut self, now_unix: u64) -> Option<JobData> {
        let id = self.ready.pop_front()?;
        let job = match self.jobs.get_mut(&id) {
            Some(job) => job,
            None => panic!("job {id} on the ready list has no record"),
        };

        if let Err(error) = job.reserve(now_unix) {
            panic!("ready job could not be reserved: {error}");
        }
        self.reserved.insert(job.priority(), id);

        Some(job.snapshot())
    }

    /// Removes a job in whatever status it currently has, returning its
    /// record. `None` means the job was already gone, which only happens
    /// when two deletes race on the same id.
    pub fn delete(&mut self, id: u64) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        self.list_mut(job.status()).remove(id);
        Some(job)
    }

    /// Snapshot of a live job, if this queue holds it.
    pub fn job_data(&self, id: u64) -> Option<JobData> {
        self.jobs.get(&id).map(Job::snapshot)
    }

    fn list_mut(&mut self, status: JobStatus) -> &mut PriorityList {
        match status {
            JobStatus::Ready => &mut self.ready,
            JobStatus::Reserved => &mut self.reserved,
            JobStatus::Delayed => &mut self.delayed,
            JobStatus::Buried => &mut self.buried,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;

    fn job(id: u64, priority: u32) -> Job {
        Job::new(id, "queue1".into(), priority, 60, Bytes::from_static(b"123"))
    }

    #[test]
    fn test_reserve_follows_priority_then_admission_order() {
        let mut queue = StatusQueue::new();
        assert_eq!(queue.reserve(0), None);

        for (i, priority) in [2, 1, 4, 1, 2, 3].into_iter().enumerate() {
            queue.add(job(i as u64 + 1, priority));
        }

        for want in [2, 4, 1, 5, 6, 3] {
            let reserved = queue.reserve(1_000).expect("a job should be ready");
            assert_eq!(reserved.id, want);
            assert_eq!(reserved.status, JobStatus::Reserved);
        }

        assert_eq!(queue.reserve(1_000), None);
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn test_reserved_jobs_move_lists() {
        let mut queue = StatusQueue::new();
        queue.add(job(1, 5));

        let snapshot = queue.reserve(1_000).unwrap();
        assert_eq!(snapshot.reservation_timeout, 60);
        assert_eq!(
            queue.job_data(1).unwrap().status,
            JobStatus::Reserved
        );

        // The ready list no longer offers it.
        assert_eq!(queue.reserve(1_000), None);
    }

    #[test]
    fn test_delete_in_any_status() {
        let mut queue = StatusQueue::new();
        queue.add(job(1, 5));
        queue.add(job(2, 5));
        queue.reserve(1_000).unwrap();

        // Job 1 is reserved, job 2 still ready; both must come out.
        assert_eq!(queue.delete(1).unwrap().id(), 1);
        assert_eq!(queue.delete(2).unwrap().id(), 2);
        assert!(queue.is_empty());

        assert!(queue.delete(1).is_none());
    }

    #[test]
    fn test_deleted_ready_job_is_never_reserved() {
        let mut queue = StatusQueue::new();
        queue.add(job(1, 1));
        queue.add(job(2, 2));

        queue.delete(1).unwrap();
        assert_eq!(queue.reserve(1_000).unwrap().id, 2);
        assert_eq!(queue.reserve(1_000), None);
    }
}
