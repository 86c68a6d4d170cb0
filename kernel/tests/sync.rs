//! Blocking primitives shared between threads.

mod common;

use std::sync::Arc;

use common::{TestMachine, Trace, STACK};
use n64_kernel::sync::{Condvar, Event, KQueue, Mailbox, Mutex, RawMutex, Semaphore};
use n64_kernel::task;
use n64_kernel::timer;

#[test]
fn mutex_hands_off_to_the_highest_priority_waiter() {
    let _m = TestMachine::boot();
    let main = task::current();
    task::set_priority(main, 10);
    let log = Arc::new(Mutex::new(Vec::new()));

    let contender = |name: &'static str, priority: i8| {
        let log = log.clone();
        task::create(name, STACK, priority, move || {
            log.lock().push(name);
            0
        })
    };

    let guard = log.lock();
    // The low one queues up first.
    let low = contender("low", 2);
    task::sleep(10);
    let high = contender("high", 3);
    task::sleep(10);
    assert_eq!(task::state(low), task::ThreadState::Waiting);
    assert_eq!(task::state(high), task::ThreadState::Waiting);
    drop(guard);

    task::set_priority(main, 0);
    task::join(low);
    task::join(high);
    assert_eq!(*log.lock(), ["high", "low"]);
}

#[test]
fn equal_priority_waiters_take_the_mutex_in_arrival_order() {
    let _m = TestMachine::boot();
    let main = task::current();
    task::set_priority(main, 10);
    let log = Arc::new(Mutex::new(Vec::new()));

    let guard = log.lock();
    let waiters: Vec<_> = ["B", "C"]
        .into_iter()
        .map(|name| {
            let log = log.clone();
            let t = task::create(name, STACK, 2, move || {
                log.lock().push(name);
                0
            });
            task::sleep(10);
            t
        })
        .collect();
    drop(guard);

    task::set_priority(main, 0);
    for t in waiters {
        task::join(t);
    }
    assert_eq!(*log.lock(), ["B", "C"]);
}

#[test]
fn unlock_yields_to_a_higher_priority_waiter() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let lock = Arc::new(Mutex::new(()));

    let guard = lock.lock();
    let (l, t) = (lock.clone(), trace.clone());
    let waiter = task::create("waiter", STACK, 1, move || {
        let _g = l.lock();
        t.push("waiter");
        0
    });
    trace.push("unlock");
    drop(guard);
    trace.push("after");

    task::join(waiter);
    assert_eq!(trace.snapshot(), ["unlock", "waiter", "after"]);
}

#[test]
fn recursive_mutex_needs_matching_unlocks() {
    let _m = TestMachine::boot();
    let mutex = RawMutex::new_recursive();
    assert!(mutex.is_recursive());
    mutex.lock();
    mutex.lock();
    assert!(mutex.try_lock());
    assert_eq!(mutex.owner(), Some(task::current()));

    mutex.unlock();
    mutex.unlock();
    assert!(mutex.is_locked());
    mutex.unlock();
    assert!(!mutex.is_locked());
    assert_eq!(mutex.owner(), None);
}

#[test]
fn timed_lock_gives_up_then_succeeds() {
    let _m = TestMachine::boot();
    let lock = Arc::new(Mutex::new(0));
    let l = lock.clone();
    let holder = task::create("holder", STACK, 1, move || {
        let mut value = l.lock();
        task::sleep(1000);
        *value = 1;
        0
    });

    let before = timer::ticks();
    assert!(lock.try_lock_for(100).is_none());
    assert!(timer::ticks() >= before + 100);
    assert!(lock.try_lock().is_none());

    let value = lock.try_lock_for(5000).map(|v| *v);
    assert_eq!(value, Some(1));
    assert!(timer::ticks() < before + 5000);
    assert_eq!(timer::pending(), 0);
    task::join(holder);
}

#[test]
#[should_panic(expected = "is not locked by")]
fn unlocking_someone_elses_mutex_is_fatal() {
    let _m = TestMachine::boot();
    let mutex = Arc::new(RawMutex::new());
    mutex.lock();
    let m = mutex.clone();
    let intruder = task::create("intruder", STACK, 1, move || {
        m.unlock();
        0
    });
    task::join(intruder);
}

#[test]
#[should_panic(expected = "mutex destroyed while locked by")]
fn dropping_a_locked_mutex_is_fatal() {
    let _m = TestMachine::boot();
    let mutex = Mutex::new(0);
    std::mem::forget(mutex.lock());
    drop(mutex);
}

#[test]
fn signal_wakes_one_and_broadcast_the_rest() {
    let _m = TestMachine::boot();
    let shared = Arc::new((Mutex::new(Vec::new()), Condvar::new()));
    let waiters: Vec<_> = [("1", 1), ("2", 2), ("3", 3)]
        .into_iter()
        .map(|(name, priority)| {
            let shared = shared.clone();
            task::create(name, STACK, priority, move || {
                let (log, cond) = &*shared;
                let mut log = log.lock();
                cond.wait(&mut log);
                log.push(name);
                0
            })
        })
        .collect();

    let (log, cond) = &*shared;
    assert_eq!(cond.waiters(), 3);

    cond.signal();
    assert_eq!(*log.lock(), ["3"]);
    assert_eq!(cond.waiters(), 2);

    cond.broadcast();
    assert_eq!(*log.lock(), ["3", "2", "1"]);
    assert_eq!(cond.waiters(), 0);

    for t in waiters {
        task::join(t);
    }
}

#[test]
fn timed_wait_returns_true_when_signalled() {
    let _m = TestMachine::boot();
    let shared = Arc::new((Mutex::new(false), Condvar::new()));
    let s = shared.clone();
    let waiter = task::create("waiter", STACK, 1, move || {
        let (ready, cond) = &*s;
        let mut ready = ready.lock();
        let signalled = cond.wait_timeout(&mut ready, 10_000);
        i32::from(signalled && *ready)
    });

    let (ready, cond) = &*shared;
    *ready.lock() = true;
    cond.signal();
    assert_eq!(task::join(waiter), 1);
    assert_eq!(timer::pending(), 0);
}

#[test]
fn semaphore_wakes_a_blocked_consumer_per_post() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let sem = Arc::new(Semaphore::new(0));
    let (s, t) = (sem.clone(), trace.clone());
    let consumer = task::create("consumer", STACK, 1, move || {
        for _ in 0..3 {
            s.wait();
            t.push("take");
        }
        3
    });

    for _ in 0..3 {
        trace.push("post");
        sem.post();
    }
    assert_eq!(task::join(consumer), 3);
    assert_eq!(trace.snapshot(), ["post", "take", "post", "take", "post", "take"]);
    assert_eq!(sem.count(), 0);
}

#[test]
fn semaphore_try_wait_takes_what_is_there() {
    let _m = TestMachine::boot();
    let sem = Semaphore::new(0);
    for _ in 0..3 {
        sem.post();
    }
    for _ in 0..3 {
        assert!(sem.try_wait(0));
    }
    assert!(!sem.try_wait(0));
}

#[test]
fn full_mailbox_blocks_the_sender() {
    let _m = TestMachine::boot();
    let mbox = Arc::new(Mailbox::new(1));
    let m = mbox.clone();
    let producer = task::create("producer", STACK, 1, move || {
        for i in 1..=3 {
            m.send(i);
        }
        0
    });

    assert!(mbox.is_full());
    assert_eq!(task::state(producer), task::ThreadState::Waiting);
    let received: Vec<i32> = (0..3).map(|_| mbox.recv()).collect();
    assert_eq!(received, [1, 2, 3]);
    assert_eq!(task::join(producer), 0);
    assert!(mbox.is_empty());
}

#[test]
fn empty_mailbox_blocks_the_receiver() {
    let _m = TestMachine::boot();
    let mbox = Arc::new(Mailbox::new(4));
    let m = mbox.clone();
    let consumer = task::create("consumer", STACK, 1, move || m.recv());
    assert_eq!(task::state(consumer), task::ThreadState::Waiting);
    assert_eq!(mbox.try_send(17), Ok(()));
    assert_eq!(task::join(consumer), 17);
}

#[test]
fn triggered_event_wakes_its_listener() {
    let _m = TestMachine::boot();
    let event = Arc::new(Event::new(5));
    let e = event.clone();
    let listener = task::create("listener", STACK, 1, move || e.wait_event());
    assert_eq!(event.attached(), 1);
    event.trigger();
    assert_eq!(task::join(listener), 5);
    assert_eq!(event.attached(), 0);
}

#[test]
#[should_panic(expected = "Too many mailboxes attached to one event")]
fn event_fan_out_is_bounded() {
    let _m = TestMachine::boot();
    let event = Event::new(());
    let boxes: Vec<_> = (0..=n64_kernel::config::MAX_EVENT_MAILBOXES)
        .map(|_| Mailbox::new(1))
        .collect();
    for mbox in &boxes {
        mbox.attach_event(&event);
    }
}

#[test]
fn queue_passes_items_in_order() {
    let _m = TestMachine::boot();
    let queue = Arc::new(KQueue::new(2));
    let q = queue.clone();
    let producer = task::create("producer", STACK, 1, move || {
        for i in 0..5 {
            q.put(i);
        }
        0
    });

    assert!(queue.is_full());
    let items: Vec<i32> = (0..5).map(|_| queue.get()).collect();
    assert_eq!(items, [0, 1, 2, 3, 4]);
    task::join(producer);
    assert!(queue.is_empty());
}
