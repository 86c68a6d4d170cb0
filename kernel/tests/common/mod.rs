//! Shared helpers for the kernel integration tests.

#![allow(dead_code)]

use std::string::String;
use std::sync::{Arc, Mutex, PoisonError};
use std::vec::Vec;

pub use n64_kernel::hosted::TestMachine;

/// Stack size used by test threads.
pub const STACK: usize = 8192;

/// Ordered record of what the threads of a test did.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
