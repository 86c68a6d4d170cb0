//! Thread lifecycle and scheduling order.

mod common;

use std::time::Duration;

use common::{TestMachine, Trace, STACK};
use n64_kernel::config::PRIORITY_IDLE;
use n64_kernel::hosted;
use n64_kernel::sync::{Condvar, Semaphore};
use n64_kernel::task::{self, ThreadState};

fn looping(trace: &Trace, name: &'static str, priority: i8, rounds: usize) -> task::ThreadId {
    let trace = trace.clone();
    task::create(name, STACK, priority, move || {
        for _ in 0..rounds {
            trace.push(name);
            task::yield_now();
        }
        0
    })
}

#[test]
fn join_returns_the_thread_result() {
    let _m = TestMachine::boot();
    let worker = task::create("worker", STACK, 1, || 42);
    assert_eq!(task::join(worker), 42);
}

#[test]
fn exit_code_reaches_the_joiner() {
    let _m = TestMachine::boot();
    let worker = task::create("worker", STACK, -1, || -> i32 { task::exit(7) });
    assert_eq!(task::join(worker), 7);
}

#[test]
fn equal_priorities_alternate() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let main = task::current();

    // Create both before either can run.
    task::set_priority(main, 6);
    let a = looping(&trace, "A", 5, 3);
    let b = looping(&trace, "B", 5, 3);
    task::set_priority(main, 0);

    assert_eq!(task::join(a), 0);
    assert_eq!(task::join(b), 0);
    assert_eq!(trace.snapshot(), ["A", "B", "A", "B", "A", "B"]);
}

#[test]
fn round_robin_schedules_everyone_once_per_round() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let threads = [
        looping(&trace, "0", -1, 2),
        looping(&trace, "1", -1, 2),
        looping(&trace, "2", -1, 2),
    ];
    for t in threads {
        task::join(t);
    }
    assert_eq!(trace.snapshot(), ["0", "1", "2", "0", "1", "2"]);
}

#[test]
fn higher_priority_runs_first() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let main = task::current();

    task::set_priority(main, 10);
    let lo = looping(&trace, "lo", 1, 1);
    let hi = looping(&trace, "hi", 2, 1);
    task::set_priority(main, 0);

    task::join(lo);
    task::join(hi);
    assert_eq!(trace.snapshot(), ["hi", "lo"]);
}

#[test]
fn create_preempts_when_the_child_outranks_the_caller() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let child = looping(&trace, "child", 1, 1);
    trace.push("main");
    task::join(child);
    assert_eq!(trace.snapshot(), ["child", "main"]);
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let sleeper = |name: &'static str, ticks: u64| {
        let trace = trace.clone();
        task::create(name, STACK, 1, move || {
            task::sleep(ticks);
            trace.push(name);
            0
        })
    };
    let slow = sleeper("slow", 3000);
    let fast = sleeper("fast", 1000);
    let medium = sleeper("medium", 2000);

    task::join(slow);
    task::join(fast);
    task::join(medium);
    assert_eq!(trace.snapshot(), ["fast", "medium", "slow"]);
    assert!(n64_kernel::timer::ticks() >= 3000);
}

#[test]
fn sleep_zero_only_yields() {
    let _m = TestMachine::boot();
    let before = n64_kernel::timer::ticks();
    task::sleep(0);
    assert_eq!(n64_kernel::timer::ticks(), before);
}

#[test]
fn try_join_reports_completion_once() {
    let _m = TestMachine::boot();
    let worker = task::create("worker", STACK, -1, || 5);
    assert_eq!(task::try_join(worker), None);
    assert_eq!(task::state(worker), ThreadState::Ready);
    task::sleep(1);
    assert_eq!(task::state(worker), ThreadState::Exited);
    assert_eq!(task::try_join(worker), Some(5));
}

#[test]
#[should_panic(expected = "invalid thread handle")]
fn joined_handles_become_invalid() {
    let _m = TestMachine::boot();
    let worker = task::create("worker", STACK, 1, || 5);
    assert_eq!(task::join(worker), 5);
    task::try_join(worker);
}

#[test]
fn killing_a_sleeping_thread_delivers_the_result() {
    let _m = TestMachine::boot();
    let victim = task::create("victim", STACK, 1, || {
        task::sleep(1_000_000);
        1
    });
    assert_eq!(task::state(victim), ThreadState::Sleeping);
    task::kill(victim, 9);
    assert_eq!(task::join(victim), 9);
}

#[test]
#[should_panic(expected = "cannot join a detached thread")]
fn joining_a_detached_thread_is_fatal() {
    let _m = TestMachine::boot();
    let worker = task::create("worker", STACK, -1, || 0);
    task::detach(worker);
    task::join(worker);
}

#[test]
#[should_panic(expected = "which is already exited")]
fn detaching_an_exited_thread_is_fatal() {
    let _m = TestMachine::boot();
    let worker = task::create("worker", STACK, 1, || 0);
    assert_eq!(task::state(worker), ThreadState::Exited);
    task::detach(worker);
}

/// Give the OS threads of dead kernel threads a moment to wind down.
fn host_threads_settle(expected: usize) -> bool {
    for _ in 0..2000 {
        if hosted::live_contexts() == expected && hosted::retired_contexts() == 0 {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn dead_threads_release_their_host_threads() {
    let _m = TestMachine::boot();
    let baseline = hosted::live_contexts();

    let finished = task::create("finished", STACK, 1, || 3);
    let exited = task::create("exited", STACK, 1, || -> i32 { task::exit(4) });
    let blocked = task::create("blocked", STACK, 1, || {
        Semaphore::new(0).wait();
        0
    });
    assert_eq!(task::state(blocked), ThreadState::Waiting);
    assert!(hosted::live_contexts() > baseline);

    task::kill(blocked, 9);
    assert_eq!(task::join(blocked), 9);
    assert_eq!(task::join(exited), 4);
    assert_eq!(task::join(finished), 3);
    assert!(host_threads_settle(baseline));
}

#[test]
fn suspended_threads_wait_for_resume() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let t = trace.clone();
    let worker = task::create("worker", STACK, 1, move || {
        task::suspend(task::current());
        t.push("resumed");
        0
    });
    assert_eq!(task::state(worker), ThreadState::Suspended);
    trace.push("main");
    task::resume(worker);
    trace.push("after");
    assert_eq!(task::join(worker), 0);
    assert_eq!(trace.snapshot(), ["main", "resumed", "after"]);
}

#[test]
fn suspending_a_ready_thread_holds_it_back() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let t = trace.clone();
    let main = task::current();
    task::set_priority(main, 1);
    let worker = task::create("worker", STACK, 0, move || {
        t.push("worker");
        0
    });
    assert_eq!(task::state(worker), ThreadState::Ready);

    task::suspend(worker);
    task::set_priority(main, 0);
    task::yield_now();
    assert_eq!(task::state(worker), ThreadState::Suspended);
    assert!(trace.snapshot().is_empty());

    task::resume(worker);
    assert_eq!(task::state(worker), ThreadState::Ready);
    assert_eq!(task::join(worker), 0);
    assert_eq!(trace.snapshot(), ["worker"]);
}

#[test]
fn raising_priority_preempts_the_caller() {
    let _m = TestMachine::boot();
    let trace = Trace::new();
    let worker = looping(&trace, "worker", -1, 1);
    trace.push("before");
    task::set_priority(worker, 1);
    trace.push("after");
    assert_eq!(task::priority(worker), 1);
    task::join(worker);
    assert_eq!(trace.snapshot(), ["before", "worker", "after"]);
}

#[test]
fn thread_table_lists_main_and_idle() {
    let _m = TestMachine::boot();
    assert_eq!(task::thread_count(), 2);
    assert_eq!(task::name(task::main_thread()), "main");
    assert_eq!(task::current(), task::main_thread());

    let worker = task::create("worker", STACK, -1, || 0);
    assert_eq!(task::thread_count(), 3);
    let infos = task::threads();
    let names: Vec<_> = infos.iter().map(|t| t.name).collect();
    assert!(names.contains(&"main"));
    assert!(names.contains(&"idle"));
    assert!(names.contains(&"worker"));
    let idle = infos.iter().find(|t| t.name == "idle").map(|t| t.priority);
    assert_eq!(idle, Some(PRIORITY_IDLE));

    task::join(worker);
    assert_eq!(task::thread_count(), 2);
}

#[test]
fn kernel_can_be_restarted() {
    let _m = TestMachine::boot();
    let worker = task::create("worker", STACK, 1, || 0);
    task::join(worker);
    n64_kernel::close();
    assert!(!n64_kernel::is_running());

    n64_kernel::init();
    assert!(n64_kernel::is_running());
    assert_eq!(task::thread_count(), 2);
}

#[test]
#[should_panic(expected = "not all threads were killed")]
fn close_requires_every_thread_to_be_gone() {
    let _m = TestMachine::boot();
    let _pending = task::create("pending", STACK, -1, || 0);
    n64_kernel::close();
}

#[test]
#[should_panic(expected = "stack size must be a multiple of 8")]
fn misaligned_stack_size_is_fatal() {
    let _m = TestMachine::boot();
    task::create("odd", 4100, 1, || 0);
}

#[test]
#[should_panic(expected = "reserved for the idle thread")]
fn idle_priority_is_reserved() {
    let _m = TestMachine::boot();
    task::create("idle2", STACK, PRIORITY_IDLE, || 0);
}

#[test]
#[should_panic(expected = "Stack guard is corrupted")]
fn stack_overflow_is_caught_at_the_next_switch() {
    let _m = TestMachine::boot();
    let victim = task::create("victim", STACK, -1, || 0);
    task::corrupt_stack_guard(victim);
    task::join(victim);
}

#[test]
#[should_panic(expected = "deadlock")]
fn blocking_forever_is_reported() {
    let _m = TestMachine::boot();
    let never = Condvar::new();
    never.wait_raw(None);
}
