//! Priority-ordered thread lists (the ready list and every wait list).
//!
//! Higher priority first; equal priorities keep insertion order, which is
//! all round-robin needs: a thread re-added after yielding lands behind its
//! peers.

use alloc::collections::VecDeque;

use super::ThreadId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: ThreadId,
    priority: i8,
}

#[derive(Debug, Default)]
pub(crate) struct ThreadList {
    entries: VecDeque<Entry>,
}

impl ThreadList {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert after every entry of equal or higher priority.
    pub fn push(&mut self, id: ThreadId, priority: i8) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { id, priority });
    }

    pub fn pop(&mut self) -> Option<ThreadId> {
        self.entries.pop_front().map(|e| e.id)
    }

    /// Head of the list and its priority.
    pub fn peek(&self) -> Option<(ThreadId, i8)> {
        self.entries.front().map(|e| (e.id, e.priority))
    }

    pub fn remove(&mut self, id: ThreadId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::arena::Arena;

    fn ids(n: usize) -> alloc::vec::Vec<ThreadId> {
        let mut arena = Arena::new(0);
        (0..n).map(|_| ThreadId(arena.insert(()))).collect()
    }

    #[test]
    fn higher_priority_first_fifo_among_equals() {
        let t = ids(4);
        let mut list = ThreadList::new();
        list.push(t[0], 1);
        list.push(t[1], 5);
        list.push(t[2], 1);
        list.push(t[3], 5);
        let order: alloc::vec::Vec<_> = core::iter::from_fn(|| list.pop()).collect();
        assert_eq!(order, [t[1], t[3], t[0], t[2]]);
    }

    #[test]
    fn remove_only_hits_members() {
        let t = ids(2);
        let mut list = ThreadList::new();
        list.push(t[0], 0);
        assert!(!list.remove(t[1]));
        assert!(list.remove(t[0]));
        assert!(list.is_empty());
    }
}
