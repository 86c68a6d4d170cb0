//! Counting semaphore.

use crate::timer;

use super::{Condvar, Mutex};

pub struct Semaphore {
    count: Mutex<i32>,
    available: Condvar,
}

impl Semaphore {
    pub const fn new(value: i32) -> Self {
        Self {
            count: Mutex::new(value),
            available: Condvar::new(),
        }
    }

    /// Take one unit, blocking while there is none.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count <= 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Take one unit, waiting at most `ticks` for it. Early wakeups that
    /// find the count still empty wait again for what is left of the budget.
    pub fn try_wait(&self, ticks: u64) -> bool {
        let mut budget = ticks;
        let mut count = self.count.lock();
        while *count <= 0 && budget > 0 {
            let started = timer::ticks();
            if !self.available.wait_timeout(&mut count, budget) {
                break;
            }
            budget = budget.saturating_sub(timer::ticks() - started);
        }
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Return one unit and wake a waiter.
    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.signal();
    }

    pub fn count(&self) -> i32 {
        *self.count.lock()
    }
}

#[cfg(all(test, feature = "hosted"))]
mod tests {
    use super::*;
    use crate::arch::hosted::TestMachine;

    #[test]
    fn counts_down_and_up() {
        let _m = TestMachine::boot();
        let sem = Semaphore::new(2);
        sem.wait();
        assert!(sem.try_wait(0));
        assert!(!sem.try_wait(0));
        sem.post();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn try_wait_spends_its_whole_budget() {
        let _m = TestMachine::boot();
        let sem = Semaphore::new(0);
        let before = timer::ticks();
        assert!(!sem.try_wait(500));
        assert!(timer::ticks() >= before + 500);
    }
}
