//! Bounded blocking FIFO.

use alloc::collections::VecDeque;

use super::{Condvar, Mutex};

/// A fixed-size FIFO shared between threads: `put` blocks while it is
/// full, `get` blocks while it is empty.
pub struct KQueue<T> {
    items: Mutex<VecDeque<T>>,
    size: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> KQueue<T> {
    pub fn new(size: usize) -> Self {
        kassert!(size > 0, "queue size must be at least 1");
        Self {
            items: Mutex::new(VecDeque::with_capacity(size)),
            size,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn put(&self, item: T) {
        let mut items = self.items.lock();
        while items.len() == self.size {
            self.not_full.wait(&mut items);
        }
        items.push_back(item);
        self.not_empty.signal();
    }

    pub fn get(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.not_full.signal();
                return item;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Copy of the oldest item, without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.items.lock().front().cloned()
    }

    pub fn count(&self) -> usize {
        self.items.lock().len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count() == self.size
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;

    #[test]
    fn fifo_order_and_bounds() {
        let _m = TestMachine::boot();
        let q = KQueue::new(3);
        assert!(q.is_empty());
        q.put('a');
        q.put('b');
        q.put('c');
        assert!(q.is_full());
        assert_eq!(q.peek(), Some('a'));
        assert_eq!(q.get(), 'a');
        assert_eq!(q.get(), 'b');
        assert_eq!(q.count(), 1);
        assert_eq!(q.size(), 3);
    }
}
