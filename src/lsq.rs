use crate::{epoch::Epoch, inst::Tag, queue::Queue};

pub const LSQ_SLOTS: usize = 20;

/// One in-flight memory operation. Address and value readiness are tracked
/// in the engine's in-flight record; the queue's job is program order.
#[derive(Debug, Copy, Clone)]
pub struct LsqEntry {
    pub tag: Tag,
    pub epoch: Epoch,
    pub is_store: bool,
}

/// Strict FIFO of memory operations. Only the head may drain to the memory
/// unit, which is what serializes loads behind earlier stores.
#[derive(Debug, Clone)]
pub struct LoadStoreQueue {
    q: Queue<LsqEntry>,
}

impl LoadStoreQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            q: Queue::new(capacity),
        }
    }

    pub fn has_space(&self) -> bool {
        !self.q.is_full()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn push(&mut self, entry: LsqEntry) {
        let rejected = self.q.try_push(entry);
        debug_assert!(rejected.is_none(), "no space in LSQ");
    }

    pub fn head(&self) -> Option<&LsqEntry> {
        self.q.front()
    }

    pub fn pop_head(&mut self) -> Option<LsqEntry> {
        self.q.try_pop()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.q.iter().any(|e| e.tag == tag)
    }

    /// Shrink from the tail while entries are younger than the flushed
    /// epoch. Entries are allocated in program order, so the speculative
    /// suffix is contiguous at the tail.
    pub fn flush_from(&mut self, epoch: Epoch) -> Vec<Tag> {
        let mut dead = Vec::new();
        while self.q.back().map(|e| e.epoch >= epoch).unwrap_or(false) {
            if let Some(e) = self.q.pop_back() {
                dead.push(e.tag);
            }
        }

        dead
    }

    /// Full reset, used by the halt flush.
    pub fn clear(&mut self) -> Vec<Tag> {
        let dead = self.q.iter().map(|e| e.tag).collect();
        self.q.clear();

        dead
    }

    pub fn iter(&self) -> impl Iterator<Item = &LsqEntry> {
        self.q.iter()
    }
}
