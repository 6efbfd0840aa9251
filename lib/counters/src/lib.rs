// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Store thousands of kernel events in a handful of atomics.
//!
//! This crate provides the [`Count`] trait, which defines a countable event,
//! and the [`counters!`] macro, which declares a set of static counters.
//! There is no tracing, no allocation, and no unbounded log: every event kind
//! gets one saturating [`core::sync::atomic::AtomicU32`], readable at any
//! time without disabling interrupts.

#![no_std]

/// A countable event.
pub trait Count {
    /// A type that counts occurrences of this event.
    type Counters;

    /// Initializer for a new set of counters. Every counter in this constant
    /// must be zero.
    const NEW_COUNTERS: Self::Counters;

    /// Increment the counter for this event.
    fn count(&self, counters: &Self::Counters);
}

/// Declares a set of event counters.
///
/// `counters!(NAME, Type)` creates a static named `NAME` counting occurrences
/// of `Type`, which must implement [`Count`]. If no name is given, the static
/// is named `__COUNTERS`.
#[macro_export]
macro_rules! counters {
    ($name:ident, $Type:ident) => {
        #[used]
        static $name: <$Type as $crate::Count>::Counters =
            <$Type as $crate::Count>::NEW_COUNTERS;
    };
    ($Type:ident) => {
        $crate::counters!(__COUNTERS, $Type);
    };
}

/// Count an event. A thin wrapper around [`Count::count`].
#[macro_export]
macro_rules! count {
    ($counters:expr, $event:expr) => {
        let (e, ctrs) = ($event, &$counters);
        $crate::Count::count(&e, ctrs);
    };
    ($event:expr) => {
        $crate::count!(__COUNTERS, $event);
    };
}
