use crate::{epoch::Epoch, inst::Tag, queue::Queue};

pub const ROB_SLOTS: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RobStatus {
    Executing,
    Ready,
}

#[derive(Debug, Copy, Clone)]
pub struct RobEntry {
    pub tag: Tag,
    pub epoch: Epoch,
    pub status: RobStatus,
}

/// FIFO ring of all in-flight instructions: the single source of program
/// order. Entries retire strictly from the head and are annulled strictly
/// from the tail.
#[derive(Debug, Clone)]
pub struct ReorderBuffer {
    q: Queue<RobEntry>,
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            q: Queue::new(capacity),
        }
    }

    pub fn is_full(&self) -> bool {
        self.q.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn push(&mut self, tag: Tag, epoch: Epoch, ready: bool) {
        let rejected = self.q.try_push(RobEntry {
            tag,
            epoch,
            status: if ready {
                RobStatus::Ready
            } else {
                RobStatus::Executing
            },
        });
        debug_assert!(rejected.is_none(), "no space in ROB");
    }

    pub fn head(&self) -> Option<&RobEntry> {
        self.q.front()
    }

    pub fn pop_head(&mut self) -> Option<RobEntry> {
        self.q.try_pop()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.q.iter().any(|e| e.tag == tag)
    }

    /// Mark an entry's result as committable. Returns false when the entry
    /// was already annulled (a unit finishing work for a flushed
    /// instruction), which callers treat as a no-op.
    pub fn mark_ready(&mut self, tag: Tag) -> bool {
        match self.q.iter_mut().find(|e| e.tag == tag) {
            Some(entry) => {
                entry.status = RobStatus::Ready;
                true
            }
            None => false,
        }
    }

    /// Pop annulled entries from the tail, youngest first, stopping at the
    /// first entry older than the flushed epoch.
    pub fn flush_from(&mut self, epoch: Epoch) -> Vec<Tag> {
        let mut dead = Vec::new();
        while self.q.back().map(|e| e.epoch >= epoch).unwrap_or(false) {
            if let Some(e) = self.q.pop_back() {
                dead.push(e.tag);
            }
        }

        dead
    }

    /// Empty the buffer, youngest first, for the halt flush.
    pub fn drain_all(&mut self) -> Vec<Tag> {
        let mut dead = Vec::new();
        while let Some(e) = self.q.pop_back() {
            dead.push(e.tag);
        }

        dead
    }

    pub fn iter(&self) -> impl Iterator<Item = &RobEntry> {
        self.q.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_gated_on_ready() {
        let mut rob = ReorderBuffer::new(ROB_SLOTS);
        rob.push(Tag(0), Epoch(0), false);
        rob.push(Tag(1), Epoch(0), false);

        assert_eq!(rob.head().unwrap().status, RobStatus::Executing);
        assert!(rob.mark_ready(Tag(0)));
        assert_eq!(rob.head().unwrap().status, RobStatus::Ready);
        assert_eq!(rob.pop_head().unwrap().tag, Tag(0));
        assert_eq!(rob.head().unwrap().tag, Tag(1));
    }

    #[test]
    fn mark_ready_on_annulled_tag_is_noop() {
        let mut rob = ReorderBuffer::new(ROB_SLOTS);
        rob.push(Tag(0), Epoch(0), false);
        assert!(!rob.mark_ready(Tag(9)));
    }

    #[test]
    fn flush_stops_at_older_epoch() {
        let mut rob = ReorderBuffer::new(ROB_SLOTS);
        rob.push(Tag(0), Epoch(0), false);
        rob.push(Tag(1), Epoch(1), false);
        rob.push(Tag(2), Epoch(1), true);

        let dead = rob.flush_from(Epoch(1));
        assert_eq!(dead, vec![Tag(2), Tag(1)]);
        assert_eq!(rob.len(), 1);
        assert_eq!(rob.head().unwrap().tag, Tag(0));
    }
}
