//! VR4300 trap boundary.
//!
//! The general exception vector at 0x8000_0180 jumps to
//! `__kernel_trap_entry`, which spills the full register state into a
//! [`RegisterBlock`] just below the interrupted stack pointer, calls
//! [`crate::traps::dispatch`] and reloads whichever block it returns. A
//! context switch is nothing more than returning a different block.

use core::arch::{asm, global_asm};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use khal::vr4300::Vr4300;

use super::regs::{RegisterBlock, GPR_SP, REGISTER_BLOCK_SIZE};
use crate::config::STACK_GUARD;

static CPU: Vr4300 = Vr4300::new();

static VECTOR_INSTALLED: AtomicBool = AtomicBool::new(false);

/// General exception vector (KSEG0).
const EXCEPTION_VECTOR: usize = 0x8000_0180;

/// RDRAM size as reported by the boot code.
const OS_MEM_SIZE: usize = 0x8000_0318;

pub(crate) fn cpu() -> &'static Vr4300 {
    &CPU
}

/// Bare metal threads need no extra execution state: everything lives in
/// their register block.
#[derive(Debug, Clone, Copy)]
pub struct Context;

global_asm!(
    ".section .text.__kernel_trap_entry",
    ".global __kernel_trap_entry",
    ".set noreorder",
    ".set noat",
    "__kernel_trap_entry:",
    "    addiu $k1, $sp, -{frame}",
    "    .irp n,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,28,29,30,31",
    "    sd $\\n, (\\n*8)($k1)",
    "    .endr",
    "    sd $zero, (26*8)($k1)",
    "    sd $zero, (27*8)($k1)",
    "    mfhi $k0",
    "    sd $k0, {hi}($k1)",
    "    mflo $k0",
    "    sd $k0, {lo}($k1)",
    "    mfc0 $k0, $12",
    "    sw $k0, {sr}($k1)",
    "    mfc0 $k0, $13",
    "    sw $k0, {cr}($k1)",
    "    mfc0 $k0, $14",
    "    sw $k0, {epc}($k1)",
    "    cfc1 $k0, $31",
    "    sw $k0, {fc31}($k1)",
    "    .irp n,0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31",
    "    sdc1 $f\\n, ({fpr}+\\n*8)($k1)",
    "    .endr",
    "    move $a0, $k1",
    "    jal __kernel_trap",
    "    addiu $sp, $k1, -32",
    "    move $k1, $v0",
    "    lw $k0, {fc31}($k1)",
    "    ctc1 $k0, $31",
    "    .irp n,0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31",
    "    ldc1 $f\\n, ({fpr}+\\n*8)($k1)",
    "    .endr",
    "    ld $k0, {hi}($k1)",
    "    mthi $k0",
    "    ld $k0, {lo}($k1)",
    "    mtlo $k0",
    // Interrupt mask bits changed while in the kernel survive the return.
    "    lw $k0, {sr}($k1)",
    "    lui $at, 0xFFFF",
    "    ori $at, $at, 0x00FF",
    "    and $k0, $k0, $at",
    "    mfc0 $at, $12",
    "    andi $at, $at, 0xFF00",
    "    or $k0, $k0, $at",
    "    mtc0 $k0, $12",
    "    lw $k0, {epc}($k1)",
    "    mtc0 $k0, $14",
    "    .irp n,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,28,29,30,31",
    "    ld $\\n, (\\n*8)($k1)",
    "    .endr",
    "    nop",
    "    eret",
    ".set at",
    ".set reorder",
    frame = const REGISTER_BLOCK_SIZE + 32,
    hi = const super::regs::OFFSET_HI,
    lo = const super::regs::OFFSET_LO,
    sr = const super::regs::OFFSET_SR,
    cr = const super::regs::OFFSET_CR,
    epc = const super::regs::OFFSET_EPC,
    fc31 = const super::regs::OFFSET_FC31,
    fpr = const super::regs::OFFSET_FPR,
);

unsafe extern "C" {
    fn __kernel_trap_entry();
}

#[unsafe(no_mangle)]
extern "C" fn __kernel_trap(regs: *mut RegisterBlock) -> *mut RegisterBlock {
    let Some(regs) = NonNull::new(regs) else {
        fatal!("trap entered without a register frame")
    };
    crate::traps::dispatch(regs).as_ptr()
}

/// Point the general exception vector at the trap entry. Idempotent.
pub(crate) fn install_traps() {
    if VECTOR_INSTALLED.swap(true, Ordering::AcqRel) {
        return;
    }
    let target = __kernel_trap_entry as usize as u32;
    let hi = (target.wrapping_add(0x8000) >> 16) & 0xFFFF;
    let lo = target & 0xFFFF;
    let stub: [u32; 4] = [
        0x3C1A_0000 | hi, // lui   $k0, %hi(entry)
        0x275A_0000 | lo, // addiu $k0, $k0, %lo(entry)
        0x0340_0008,      // jr    $k0
        0x0000_0000,      // nop
    ];
    for (i, word) in stub.iter().enumerate() {
        let addr = EXCEPTION_VECTOR + i * 4;
        // SAFETY: the vector area is reserved for exactly this stub.
        unsafe {
            core::ptr::write_volatile(addr as *mut u32, *word);
        }
    }
    // SAFETY: write the stub back from the data cache, then drop any stale
    // instruction cache line covering the vector.
    unsafe {
        asm!(
            "cache 0x19, 0({0})",
            "cache 0x10, 0({0})",
            in(reg) EXCEPTION_VECTOR,
            options(nostack)
        );
    }
}

/// Trap into the scheduler.
pub(crate) fn switch_thread() -> super::Resume {
    // SAFETY: SYSCALL 0 is handled by the scheduler, which resumes us right
    // after the instruction.
    unsafe { asm!("syscall 0", options(nostack)) };
    super::Resume::Continue
}

pub(crate) fn fetch_opcode(pc: u32) -> u32 {
    // SAFETY: `pc` is the EPC of a trap that was just taken, so it points to
    // mapped, executable memory.
    unsafe { core::ptr::read_volatile(pc as usize as *const u32) }
}

pub(crate) fn spawn_context(_name: &'static str) -> Context {
    Context
}

pub(crate) fn adopt_main() -> Context {
    Context
}

pub(crate) fn retire(_context: &Context) {}

/// The boot stack sits at the very top of RDRAM.
pub(crate) fn boot_stack(size: usize) -> Option<(NonNull<u8>, usize)> {
    // SAFETY: the IPL3 stores the detected memory size at this address.
    let mem_size = unsafe { core::ptr::read_volatile(OS_MEM_SIZE as *const u32) } as usize;
    let top = 0x8000_0000usize + mem_size;
    NonNull::new((top - size - STACK_GUARD) as *mut u8).map(|base| (base, size))
}

extern "C" fn thread_trampoline() -> ! {
    crate::task::sched::thread_main();
    abandon()
}

/// Register state a new thread starts from.
pub(crate) fn initial_frame(stack_top: usize) -> RegisterBlock {
    let mut regs = RegisterBlock::zeroed();
    let sp = (stack_top - REGISTER_BLOCK_SIZE - 32) & !7;
    regs.gpr[GPR_SP] = sp as u32 as i32 as i64 as u64;
    let gp: u64;
    // SAFETY: reading $gp has no side effects.
    unsafe { asm!("move {0}, $gp", out(reg) gp, options(nomem, nostack)) };
    regs.gpr[28] = gp;
    regs.epc = thread_trampoline as usize as u32;
    regs.sr = super::initial_status();
    regs
}

/// Interrupts arrive on their own.
pub(crate) fn poll_pending() {}

pub(crate) fn idle_wait() {
    core::hint::spin_loop();
}

/// Spin on a context that will never be scheduled again.
pub(crate) fn abandon() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

pub(crate) fn unwinding() -> bool {
    false
}
