// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel's external collaborators.
//!
//! §1 calls these out as interfaces only: a monotonic tick counter, a
//! critical-section bracket, and an optional assert hook. Each is a
//! single-method trait the embedding application implements; the kernel
//! context is generic over them, so a host test can supply fakes without
//! `cfg`-gating a whole architecture module the way a target port would.

/// Opaque tick count from the free-running counter. Not necessarily
/// milliseconds; see the GLOSSARY.
pub type Ticks = u64;

/// The monotonic tick counter backing all timing in the kernel.
pub trait Clock {
    fn now(&self) -> Ticks;
}

/// Brackets a critical section. On real hardware this disables and
/// re-enables interrupts; the kernel never assumes anything about the
/// implementation beyond "nothing else touches kernel state while `f` runs".
pub trait CriticalSection {
    fn with<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// Invoked at each internal precondition failure, mirroring
/// `SYSTEM_ASSERT_BEHAVIOR(file, line)`. The default implementation does
/// nothing; kernel logic never depends on this being called for
/// correctness, only for diagnostics.
pub trait AssertHook {
    fn on_failure(&self, file: &'static str, line: u32);
}

/// No-op assert hook for targets (or tests) that don't care.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullAssertHook;

impl AssertHook for NullAssertHook {
    fn on_failure(&self, _file: &'static str, _line: u32) {}
}

/// Critical section that brackets nothing. Correct only on a single core
/// with no real interrupts to race against -- a host simulation, or a
/// target whose actual interrupt-disable lives behind a different
/// mechanism than this hook.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullCriticalSection;

impl CriticalSection for NullCriticalSection {
    fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// Records an internal precondition failure via the configured
/// [`AssertHook`]. Used the way `SYSTEM_ASSERT_BEHAVIOR` is invoked in the
/// source this kernel is descended from: as a diagnostic side channel, never
/// as control flow.
#[macro_export]
macro_rules! assert_hook {
    ($hook:expr) => {
        $crate::hooks::AssertHook::on_failure($hook, file!(), line!())
    };
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use core::cell::Cell;

    /// Host test double for [`Clock`]: ticks only when told to.
    #[derive(Default)]
    pub struct FakeClock {
        now: Cell<Ticks>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self { now: Cell::new(0) }
        }

        pub fn advance(&self, by: Ticks) {
            self.now.set(self.now.get() + by);
        }

        pub fn set(&self, to: Ticks) {
            self.now.set(to);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Ticks {
            self.now.get()
        }
    }

    /// Host test double for [`CriticalSection`]: there's only one thread in
    /// these tests, so the bracket is a no-op.
    #[derive(Copy, Clone, Debug, Default)]
    pub struct FakeCriticalSection;

    impl CriticalSection for FakeCriticalSection {
        fn with<R>(&self, f: impl FnOnce() -> R) -> R {
            f()
        }
    }

    /// Test double for [`AssertHook`] that records how many times it fired,
    /// so tests can assert a precondition violation was actually reported.
    #[derive(Default)]
    pub struct CountingAssertHook {
        pub count: Cell<u32>,
    }

    impl AssertHook for CountingAssertHook {
        fn on_failure(&self, _file: &'static str, _line: u32) {
            self.count.set(self.count.get() + 1);
        }
    }
}
