// =============================================================================
// n64-kernel — Panic Handler
// =============================================================================
//
// Every kassert!/fatal! and every Rust panic ends here on hardware. The
// message and location go to the debug port, then the CPU spins with
// interrupts masked. There is no unwinding (panic = "abort").
// =============================================================================

use core::panic::PanicInfo;

use khal::{Cpu, Status};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let cpu = crate::arch::cpu();
    cpu.set_status(cpu.status() - Status::IE);

    klog::println!();
    klog::println!("==========================================================");
    klog::println!("  KERNEL PANIC");
    klog::println!("==========================================================");
    if let Some(location) = info.location() {
        klog::println!("  Location: {}:{}", location.file(), location.line());
    } else {
        klog::println!("  Location: <unknown>");
    }
    klog::println!("  Message: {}", info.message());
    klog::println!("==========================================================");

    loop {
        core::hint::spin_loop();
    }
}
