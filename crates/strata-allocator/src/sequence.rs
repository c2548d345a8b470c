//! Sequence affinity.
//!
//! The allocator is not a concurrent data structure: every call has to come
//! from the same thread. [`SequenceChecker`] binds to the first thread that
//! checks it and panics on any other.

use std::sync::OnceLock;
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
pub struct SequenceChecker {
    owner: OnceLock<ThreadId>,
}

impl SequenceChecker {
    /// A checker bound to the calling thread.
    pub fn new() -> Self {
        let checker = Self::detached();
        let _ = checker.owner.set(thread::current().id());
        checker
    }

    /// A checker that binds to whichever thread checks it first.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Unbind, so the next [`check`](Self::check) binds to its thread.
    pub fn detach(&mut self) {
        self.owner = OnceLock::new();
    }

    pub fn is_current(&self) -> bool {
        let current = thread::current().id();
        *self.owner.get_or_init(|| current) == current
    }

    /// Panics if called off the bound thread.
    #[track_caller]
    pub fn check(&self) {
        assert!(
            self.is_current(),
            "allocator used off its sequence (bound to {:?}, called from {:?})",
            self.owner.get(),
            thread::current().id()
        );
    }
}
