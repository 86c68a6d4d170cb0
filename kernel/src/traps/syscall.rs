//! Routing of `SYSCALL n` instructions to registered handlers.
//!
//! Code 0 belongs to the scheduler. Any other code in `1..=0xFFFFF` can be
//! claimed as part of a range by one handler.

use spin::RwLock;

use crate::config::MAX_SYSCALL_HANDLERS;

use super::exception::Exception;

/// Largest code a `SYSCALL` instruction can carry.
pub const MAX_SYSCALL_CODE: u32 = 0xF_FFFF;

/// Handler for a range of syscall codes; gets the code that was invoked.
pub type SyscallHandler = fn(&mut Exception<'_>, u32);

#[derive(Clone, Copy)]
struct Route {
    first: u32,
    last: u32,
    handler: SyscallHandler,
}

static ROUTES: RwLock<[Option<Route>; MAX_SYSCALL_HANDLERS]> =
    RwLock::new([None; MAX_SYSCALL_HANDLERS]);

/// Route codes `first..=last` to `handler`.
pub fn register_syscall_handler(handler: SyscallHandler, first: u32, last: u32) {
    kassert!(
        first <= MAX_SYSCALL_CODE,
        "The maximum allowed syscall code is 0xFFFFF (requested: {:05x})",
        first
    );
    kassert!(
        last <= MAX_SYSCALL_CODE,
        "The maximum allowed syscall code is 0xFFFFF (requested: {:05x})",
        last
    );
    kassert!(
        first <= last,
        "Invalid range for syscall handler (first: {:05x}, last: {:05x})",
        first,
        last
    );
    kassert!(first > 0, "syscall code 0 is reserved for the scheduler");

    let mut routes = ROUTES.write();
    let overlap = routes
        .iter()
        .flatten()
        .find(|r| r.first <= last && r.last >= first)
        .map(|r| (r.first, r.last));
    if let Some((a, b)) = overlap {
        drop(routes);
        fatal!(
            "Syscall handler already registered for code range {:05x} - {:05x}",
            a,
            b
        );
    }
    let Some(index) = routes.iter().position(Option::is_none) else {
        drop(routes);
        fatal!("Too many syscall handlers");
    };
    routes[index] = Some(Route {
        first,
        last,
        handler,
    });
    klog::debug!("syscall: routed {:05x}..={:05x}", first, last);
}

/// Remove the route that starts at `first`. Returns false if there is none.
pub fn unregister_syscall_handler(first: u32) -> bool {
    let mut routes = ROUTES.write();
    match routes.iter_mut().find(|slot| slot.is_some_and(|r| r.first == first)) {
        Some(slot) => {
            *slot = None;
            true
        }
        None => false,
    }
}

/// Call the handler owning `code`. Returns false if nobody claimed it.
pub(crate) fn route(ex: &mut Exception<'_>, code: u32) -> bool {
    let handler = ROUTES
        .read()
        .iter()
        .flatten()
        .find(|r| r.first <= code && code <= r.last)
        .map(|r| r.handler);
    match handler {
        Some(handler) => {
            handler(ex, code);
            true
        }
        None => false,
    }
}

#[cfg(feature = "hosted")]
pub(crate) fn reset() {
    *ROUTES.write() = [None; MAX_SYSCALL_HANDLERS];
}
