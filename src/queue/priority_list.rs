//! An ordered container of job ids: ascending priority value, FIFO within a
//! priority.

use std::collections::{BTreeMap, HashMap};

type NodeIdx = usize;

/// A link in one priority's FIFO. Freed slots keep their last contents and
/// are only reached again through the free list.
#[derive(Clone, Copy, Debug)]
struct Node {
    id: u64,
    priority: u32,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
}

#[derive(Clone, Copy, Debug)]
struct Bucket {
    head: NodeIdx,
    tail: NodeIdx,
}

/// The jobs of one status, ordered for reservation.
///
/// Lower priority values are scheduled first; jobs of equal priority come
/// back in admission order. Nodes live in an arena indexed by job id, so
/// removing an arbitrary job unlinks in O(1) wherever it sits in its FIFO,
/// which is what keeps deleting a reserved job cheap.
#[derive(Debug, Default)]
pub struct PriorityList {
    nodes: Vec<Node>,
    free: Vec<NodeIdx>,
    buckets: BTreeMap<u32, Bucket>,
    by_id: HashMap<u64, NodeIdx>,
}

impl PriorityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Appends a job after every queued job of lower or equal priority.
    ///
    /// Panics if the id is already present: ids are unique for the process
    /// lifetime, so a duplicate means the store is corrupt.
    pub fn insert(&mut self, priority: u32, id: u64) {
        let idx = self.alloc(Node {
            id,
            priority,
            prev: None,
            next: None,
        });
        assert!(
            self.by_id.insert(id, idx).is_none(),
            "job {id} inserted into a status list twice"
        );

        if let Some(bucket) = self.buckets.get_mut(&priority) {
            let tail = bucket.tail;
            bucket.tail = idx;
            self.nodes[tail].next = Some(idx);
            self.nodes[idx].prev = Some(tail);
        } else {
            self.buckets.insert(priority, Bucket { head: idx, tail: idx });
        }
    }

    /// Removes and returns the first job of the lowest priority value, or
    /// `None` when no jobs are queued.
    pub fn pop_front(&mut self) -> Option<u64> {
        let bucket = self.buckets.values().next().copied()?;
        let id = self.nodes[bucket.head].id;
        self.unlink(bucket.head);
        Some(id)
    }

    /// Unlinks the job with the given id.
    ///
    /// Panics if the job is not present: callers only remove jobs they know
    /// to be in this list, so absence means the store is corrupt.
    pub fn remove(&mut self, id: u64) {
        let idx = match self.by_id.get(&id) {
            Some(&idx) => idx,
            None => panic!("job {id} missing from its status list"),
        };
        self.unlink(idx);
    }

    fn alloc(&mut self, node: Node) -> NodeIdx {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn unlink(&mut self, idx: NodeIdx) {
        let Node {
            id,
            priority,
            prev,
            next,
        } = self.nodes[idx];
        self.by_id.remove(&id);
        self.free.push(idx);

        match (prev, next) {
            // Last job of this priority: the bucket goes away with it.
            (None, None) => {
                self.buckets.remove(&priority);
            }
            (None, Some(n)) => {
                self.nodes[n].prev = None;
                self.bucket_mut(priority).head = n;
            }
            (Some(p), None) => {
                self.nodes[p].next = None;
                self.bucket_mut(priority).tail = p;
            }
            (Some(p), Some(n)) => {
                self.nodes[p].next = Some(n);
                self.nodes[n].prev = Some(p);
            }
        }
    }

    fn bucket_mut(&mut self, priority: u32) -> &mut Bucket {
        match self.buckets.get_mut(&priority) {
            Some(bucket) => bucket,
            None => panic!("no bucket for priority {priority}"),
        }
    }
}
