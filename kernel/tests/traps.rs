//! Syscall routing and exception reporting.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;

use common::TestMachine;
use khal::ExcCode;
use n64_kernel::arch::regs::{GPR_A0, GPR_V0};
use n64_kernel::hosted::{self, SCRATCH_PC};
use n64_kernel::traps::{self, Exception, ExceptionKind};

static LAST_CODE: AtomicU32 = AtomicU32::new(0);
static SEEN: StdMutex<Vec<(ExceptionKind, &'static str)>> = StdMutex::new(Vec::new());

fn double(ex: &mut Exception<'_>, code: u32) {
    LAST_CODE.store(code, Ordering::SeqCst);
    ex.regs.gpr[GPR_V0] = ex.regs.gpr[GPR_A0] * 2;
}

fn nothing(_: &mut Exception<'_>, _: u32) {}

/// Record the diagnosis and step over the faulting instruction.
fn skip(ex: &mut Exception<'_>) {
    SEEN.lock().unwrap().push((ex.kind, ex.info));
    ex.regs.epc = ex.regs.epc.wrapping_add(4);
}

fn seen() -> Vec<(ExceptionKind, &'static str)> {
    SEEN.lock().unwrap().clone()
}

fn machine() -> TestMachine {
    let m = TestMachine::boot();
    SEEN.lock().unwrap().clear();
    LAST_CODE.store(0, Ordering::SeqCst);
    m
}

#[test]
fn syscalls_reach_the_handler_of_their_range() {
    let _m = machine();
    traps::register_syscall_handler(double, 0x100, 0x1FF);

    let regs = hosted::syscall(0x123, 21);
    assert_eq!(LAST_CODE.load(Ordering::SeqCst), 0x123);
    assert_eq!(regs.gpr[GPR_V0], 42);
    assert_eq!(regs.epc, SCRATCH_PC + 4);

    assert!(traps::unregister_syscall_handler(0x100));
    assert!(!traps::unregister_syscall_handler(0x100));
}

#[test]
#[should_panic(expected = "Unhandled syscall exception at PC:80002000")]
fn unclaimed_syscalls_are_fatal() {
    let _m = machine();
    traps::register_syscall_handler(double, 0x100, 0x1FF);
    hosted::syscall(0x200, 0);
}

#[test]
#[should_panic(expected = "Syscall handler already registered for code range 00010 - 00020")]
fn overlapping_ranges_are_rejected() {
    let _m = machine();
    traps::register_syscall_handler(nothing, 0x10, 0x20);
    traps::register_syscall_handler(nothing, 0x18, 0x30);
}

#[test]
#[should_panic(expected = "Too many syscall handlers")]
fn the_routing_table_is_bounded() {
    let _m = machine();
    for i in 0..=n64_kernel::config::MAX_SYSCALL_HANDLERS as u32 {
        traps::register_syscall_handler(nothing, 0x10 * (i + 1), 0x10 * (i + 1) + 7);
    }
}

#[test]
#[should_panic(expected = "reserved for the scheduler")]
fn code_zero_cannot_be_claimed() {
    let _m = machine();
    traps::register_syscall_handler(nothing, 0, 4);
}

#[test]
#[should_panic(expected = "The maximum allowed syscall code is 0xFFFFF")]
fn codes_are_twenty_bits() {
    let _m = machine();
    traps::register_syscall_handler(nothing, 1, 0x10_0000);
}

#[test]
fn custom_handler_can_skip_the_fault() {
    let _m = machine();
    let previous = traps::register_exception_handler(Some(skip));
    assert!(previous.is_some());

    let regs = hosted::raise_exception(ExcCode::TlbLoadMiss, 0x10, 0x8000_4000);
    assert_eq!(regs.epc, 0x8000_4004);
    hosted::raise_exception(ExcCode::TlbStoreMiss, 0x8000_0000, 0x8000_4010);
    assert_eq!(
        seen(),
        [
            (ExceptionKind::Critical, "NULL pointer dereference (read)"),
            (ExceptionKind::Critical, "Write to invalid memory address"),
        ]
    );
}

#[test]
fn no_handler_ignores_exceptions() {
    let _m = machine();
    traps::register_exception_handler(None);
    let regs = hosted::raise_exception(ExcCode::Breakpoint, 0, 0x8000_4000);
    assert_eq!(regs.epc, 0x8000_4000);
}

#[test]
#[should_panic(expected = "Misaligned write to memory exception at PC:80004000")]
fn default_handler_aborts_with_a_diagnosis() {
    let _m = machine();
    hosted::raise_exception(ExcCode::StoreAddressError, 0x8000_0001, 0x8000_4000);
}

#[test]
fn tls_faults_depend_on_the_kernel() {
    let _m = machine();
    traps::register_exception_handler(Some(skip));
    hosted::raise_exception(ExcCode::LoadAddressError, 0x1000_0002, 0x8000_4000);

    n64_kernel::close();
    traps::register_exception_handler(Some(skip));
    hosted::raise_exception(ExcCode::StoreAddressError, 0x1000_0002, 0x8000_4000);

    let infos: Vec<_> = seen().into_iter().map(|(_, info)| info).collect();
    assert_eq!(
        infos,
        [
            "Read from TLS in interrupt handler",
            "Cannot access TLS without kernel_init()",
        ]
    );
}

#[test]
fn guarded_division_is_recognised() {
    let _m = machine();
    traps::register_exception_handler(Some(skip));
    // teq $a0, $zero, 7
    hosted::write_text(0x8000_5000, (4 << 21) | (7 << 6) | 0x34);
    hosted::raise_exception(ExcCode::Trap, 0, 0x8000_5000);
    assert_eq!(seen(), [(ExceptionKind::Critical, "Integer divide by zero")]);
}
