// =============================================================================
// n64-kernel — Hosted Machine
// =============================================================================
//
// Runs the kernel on a development host against a simulated VR4300.
//
// CPU:
//   khal::sim::SimCpu. Time only moves when someone advances it (tests, or
//   the idle thread jumping to the next timer deadline), so every run is
//   deterministic.
//
// THREADS:
//   Each kernel thread is carried by one OS thread. A single baton says
//   which one may run; everyone else sleeps on a condvar. A trap is a plain
//   function call: fill the thread's register frame, run the dispatcher,
//   and if it returned another thread's frame, hand the baton to that
//   thread and wait until someone hands it back.
//
//   Panics on a kernel thread are caught and re-raised on the main thread,
//   so a fatal error anywhere fails the test that caused it.
//
//   A context that will never run again (its thread exited, was killed
//   while blocked, or belongs to an earlier machine) unwinds its OS thread
//   with an `Abandoned` payload. Kernel Drop impls do nothing while
//   unwinding, so only the thread's own data is released.
//
// TESTS:
//   Kernel state is global. TestMachine serializes tests and puts every
//   piece of state back to power-on when dropped. OS threads left over from
//   an earlier machine notice the epoch change and wind down.
//
// =============================================================================

use std::any::Any;
use std::boxed::Box;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::string::{String, ToString};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use khal::sim::SimCpu;
use khal::{Cause, Cpu, ExcCode, MiLines, Status};

use super::regs::{RegisterBlock, GPR_A0, GPR_SP, REGISTER_BLOCK_SIZE};
use super::Resume;
use crate::config::KernelConfig;
use crate::task::{sched, ThreadId};

static CPU: SimCpu = SimCpu::new();

/// Address of the scheduler's `SYSCALL 0`.
pub const SWITCH_PC: u32 = 0x8000_1000;
/// Address used by [`syscall`] for arbitrary codes.
pub const SCRATCH_PC: u32 = 0x8000_2000;
/// Where new threads pretend to start.
pub const THREAD_ENTRY_PC: u32 = 0x8000_3000;

const HOST_STACK_SIZE: usize = 512 * 1024;

struct Baton {
    owner: u64,
    main: u64,
    epoch: u64,
    /// Panic message of a kernel thread, to be re-raised on main.
    crash: Option<String>,
    /// Contexts whose OS thread is still around.
    live: BTreeSet<u64>,
    /// Live contexts whose kernel thread was freed. Drained by the OS
    /// thread on its way out.
    retired: BTreeSet<u64>,
}

static BATON: Mutex<Baton> = Mutex::new(Baton {
    owner: 0,
    main: 0,
    epoch: 0,
    crash: None,
    live: BTreeSet::new(),
    retired: BTreeSet::new(),
});

static TURN: Condvar = Condvar::new();

static TEXT: Mutex<BTreeMap<u32, u32>> = Mutex::new(BTreeMap::new());

static SERIAL: Mutex<()> = Mutex::new(());

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static TOKEN: Cell<u64> = const { Cell::new(0) };
}

fn baton() -> MutexGuard<'static, Baton> {
    BATON.lock().unwrap_or_else(PoisonError::into_inner)
}

fn text() -> MutexGuard<'static, BTreeMap<u32, u32>> {
    TEXT.lock().unwrap_or_else(PoisonError::into_inner)
}

fn my_token() -> u64 {
    TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

/// Unwind payload of a context leaving for good.
struct Abandoned;

pub fn cpu() -> &'static SimCpu {
    &CPU
}

/// Execution context of one kernel thread: the OS thread carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    token: u64,
}

// ── Contexts ────────────────────────────────────────────────────

pub(crate) fn install_traps() {}

pub(crate) fn boot_stack(_size: usize) -> Option<(NonNull<u8>, usize)> {
    None
}

/// The caller becomes the main thread.
pub(crate) fn adopt_main() -> Context {
    let token = my_token();
    let mut baton = baton();
    baton.owner = token;
    baton.main = token;
    Context { token }
}

pub(crate) fn spawn_context(name: &'static str) -> Context {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    let epoch = {
        let mut baton = baton();
        baton.live.insert(token);
        baton.epoch
    };
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .stack_size(HOST_STACK_SIZE)
        .spawn(move || run_context(token, epoch));
    if let Err(err) = spawned {
        fatal!("cannot start host thread for {}: {}", name, err);
    }
    Context { token }
}

pub(crate) fn retire(context: &Context) {
    let mut baton = baton();
    if baton.live.contains(&context.token) {
        baton.retired.insert(context.token);
        drop(baton);
        TURN.notify_all();
    }
}

fn run_context(token: u64, epoch: u64) {
    TOKEN.with(|t| t.set(token));
    {
        let mut baton = baton();
        loop {
            if baton.epoch != epoch || baton.retired.contains(&token) {
                drop(baton);
                finish(token);
                return;
            }
            if baton.owner == token {
                break;
            }
            baton = TURN.wait(baton).unwrap_or_else(PoisonError::into_inner);
        }
    }

    leave_trap();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        poll_pending();
        sched::thread_main();
    }));
    match outcome {
        Ok(()) => {}
        Err(payload) if payload.is::<Abandoned>() => {}
        Err(payload) => crash(describe_panic(payload)),
    }
    finish(token);
}

/// The OS thread behind `token` is about to end.
fn finish(token: u64) {
    let mut baton = baton();
    baton.live.remove(&token);
    baton.retired.remove(&token);
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "kernel thread panicked".to_string())
}

fn crash(message: String) {
    let mut baton = baton();
    baton.crash = Some(message);
    baton.owner = baton.main;
    TURN.notify_all();
}

fn hand_over(token: u64) {
    baton().owner = token;
    TURN.notify_all();
}

/// Sleep until the baton comes back to the calling context.
fn wait_for_turn() {
    let token = my_token();
    let mut baton = baton();
    let epoch = baton.epoch;
    loop {
        if baton.epoch != epoch || baton.retired.contains(&token) {
            drop(baton);
            abandon();
        }
        if baton.owner == token {
            if token == baton.main {
                if let Some(message) = baton.crash.take() {
                    drop(baton);
                    panic!("{}", message);
                }
            }
            return;
        }
        baton = TURN.wait(baton).unwrap_or_else(PoisonError::into_inner);
    }
}

/// Unwind the calling context out of its OS thread.
pub(crate) fn abandon() -> ! {
    panic::resume_unwind(Box::new(Abandoned))
}

pub(crate) fn unwinding() -> bool {
    std::thread::panicking()
}

// ── Traps ───────────────────────────────────────────────────────

/// Take a trap on the calling context and come back from it.
///
/// Returns the caller's register frame as it looks on the way out, and
/// whether the caller survived the trap.
fn trap(cause: u32, epc: u32, prepare: impl FnOnce(&mut RegisterBlock)) -> (Resume, RegisterBlock) {
    let entry_status = CPU.status();
    CPU.set_status(entry_status | Status::EXL);

    let me: Option<ThreadId> = sched::current();
    let mut local = RegisterBlock::zeroed();
    let frame = sched::trap_frame().unwrap_or(NonNull::from(&mut local));

    // SAFETY: the frame is either our stack slot or the current thread's
    // frame slot, which nobody else touches while we hold the baton.
    unsafe {
        let regs = &mut *frame.as_ptr();
        regs.cr = cause;
        regs.epc = epc;
        regs.sr = (entry_status | Status::EXL).bits();
        prepare(regs);
    }

    let next = crate::traps::dispatch(frame);
    if next != frame {
        let target = sched::current_context();
        let alive = me.is_some_and(sched::may_resume);
        let Some(target) = target else {
            fatal!("trap switched to a thread without a context")
        };
        if target.token != my_token() {
            hand_over(target.token);
            if !alive {
                return (Resume::Retired, RegisterBlock::zeroed());
            }
            wait_for_turn();
        }
    }

    let frame = sched::trap_frame().unwrap_or(NonNull::from(&mut local));
    leave_trap_with(frame);
    // SAFETY: as above.
    (Resume::Continue, unsafe { *frame.as_ptr() })
}

/// Install the Status register saved in the running thread's frame.
fn leave_trap() {
    if let Some(frame) = sched::trap_frame() {
        leave_trap_with(frame);
    }
}

fn leave_trap_with(frame: NonNull<RegisterBlock>) {
    // SAFETY: see `trap`.
    let saved = unsafe { frame.as_ref().sr };
    let live_mask = CPU.status().bits() & Status::IM_ALL;
    let merged = Status::from_bits_retain((saved & !Status::IM_ALL) | live_mask);
    CPU.set_status(merged - Status::EXL);
}

/// Deliver every interrupt that the simulated CPU would take right now.
pub(crate) fn poll_pending() {
    while CPU.interrupt_ready() {
        let cause = Cause::from_code(ExcCode::Interrupt, CPU.latch_cause()).0;
        if let (Resume::Retired, _) = trap(cause, 0, |_| {}) {
            abandon();
        }
    }
}

pub(crate) fn switch_thread() -> Resume {
    kassert!(
        crate::sync::spinlock::held() == 0,
        "context switch while holding a spinlock"
    );
    kassert!(
        !crate::irq::in_interrupt(),
        "context switch requested from interrupt context"
    );
    let cause = Cause::from_code(ExcCode::Syscall, 0).0;
    let (resume, _) = trap(cause, SWITCH_PC, |_| {});
    if resume == Resume::Continue {
        poll_pending();
    }
    resume
}

pub(crate) fn fetch_opcode(pc: u32) -> u32 {
    text().get(&pc).copied().unwrap_or(0)
}

pub(crate) fn initial_frame(stack_top: usize) -> RegisterBlock {
    let mut regs = RegisterBlock::zeroed();
    regs.gpr[GPR_SP] = ((stack_top - REGISTER_BLOCK_SIZE - 32) & !7) as u64;
    regs.epc = THREAD_ENTRY_PC;
    regs.sr = super::initial_status();
    regs
}

/// Nothing to run: let time jump to the next timer deadline.
pub(crate) fn idle_wait() {
    if !CPU.interrupt_ready() {
        match CPU.compare() {
            Some(deadline) => {
                if deadline > CPU.ticks() {
                    CPU.set_ticks(deadline);
                }
            }
            None => fatal!("deadlock: every thread is blocked and no timer is armed"),
        }
    }
    poll_pending();
}

// ── Test machine ────────────────────────────────────────────────

/// Put a fake instruction word at `pc`.
pub fn write_text(pc: u32, opcode: u32) {
    text().insert(pc, opcode);
}

/// Execute `SYSCALL code` with `a0` in the first argument register. Returns
/// the register frame as the handler left it.
pub fn syscall(code: u32, a0: u64) -> RegisterBlock {
    write_text(SCRATCH_PC, (code << 6) | 0x0C);
    let cause = Cause::from_code(ExcCode::Syscall, 0).0;
    let (_, regs) = trap(cause, SCRATCH_PC, |regs| regs.gpr[GPR_A0] = a0);
    poll_pending();
    regs
}

/// Take a synchronous exception at `epc`, with `prepare` filling in any
/// further register state.
pub fn raise(cause: u32, epc: u32, prepare: impl FnOnce(&mut RegisterBlock)) -> RegisterBlock {
    let (_, regs) = trap(cause, epc, prepare);
    poll_pending();
    regs
}

/// Take exception `code` at `epc` with BadVAddr set to `badvaddr`.
pub fn raise_exception(code: ExcCode, badvaddr: u64, epc: u32) -> RegisterBlock {
    CPU.set_badvaddr(badvaddr);
    raise(Cause::from_code(code, 0).0, epc, |_| {})
}

pub fn raise_mi(lines: MiLines) {
    CPU.raise_mi(lines);
    poll_pending();
}

pub fn raise_cart() {
    CPU.raise_cart();
    poll_pending();
}

pub fn lower_cart() {
    CPU.lower_cart();
}

/// Press the reset button.
pub fn raise_reset() {
    CPU.raise_prenmi();
    poll_pending();
}

/// Let `ticks` of virtual time pass and deliver whatever became due.
pub fn advance_ticks(ticks: u64) {
    CPU.advance(ticks);
    poll_pending();
}

fn reset_text() {
    let mut text = text();
    text.clear();
    text.insert(SWITCH_PC, sched::SWITCH_OPCODE);
}

/// OS threads of the current machine that still carry a kernel context.
pub fn live_contexts() -> usize {
    baton().live.len()
}

/// Freed contexts whose OS thread has not wound down yet.
pub fn retired_contexts() -> usize {
    baton().retired.len()
}

/// Return the whole machine to its power-on state.
pub fn reset_machine() {
    {
        let token = my_token();
        let mut baton = baton();
        baton.epoch += 1;
        baton.owner = token;
        baton.main = token;
        baton.crash = None;
        baton.live.clear();
        baton.retired.clear();
    }
    TURN.notify_all();

    CPU.reset();
    crate::irq::reset();
    sched::force_reset();
    crate::traps::reset();
    crate::timer::reset();
    crate::sync::irqwait::reset();
    crate::sync::spinlock::reset_held();
    reset_text();
}

/// Exclusive use of the simulated machine for one test.
///
/// ```ignore
/// let _m = TestMachine::boot();
/// let t = task::create("t", 4096, 1, || 7);
/// assert_eq!(task::join(t), 7);
/// ```
pub struct TestMachine {
    _serial: MutexGuard<'static, ()>,
}

impl TestMachine {
    /// A clean machine with nothing initialized.
    pub fn new() -> Self {
        let serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        reset_machine();
        Self { _serial: serial }
    }

    /// A clean machine with the kernel running on the calling thread.
    pub fn boot() -> Self {
        Self::boot_with(KernelConfig::default())
    }

    pub fn boot_with(config: KernelConfig) -> Self {
        let machine = Self::new();
        crate::init_with(config);
        machine
    }
}

impl Default for TestMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestMachine {
    fn drop(&mut self) {
        reset_machine();
    }
}
