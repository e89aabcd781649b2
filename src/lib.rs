// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! The action execution engine of a software switch dataplane.
//!
//! Once a packet has been classified and matched against a flow
//! table, the flow's action list is handed to this crate. The engine
//! rewrites L2-L4 headers in place while keeping transport checksums
//! valid via incremental updates, replicates or samples the packet,
//! recirculates it through classification, or emits it on a virtual
//! port. Classification itself, the control plane which builds action
//! lists, and virtual port I/O are all collaborators declared as
//! traits in [`engine::port`].

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::cell::Cell;
use core::fmt::{self, Display};

// NOTE: Things get weird if you move the extern crate into cfg_if!.
#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[cfg(all(not(feature = "std"), not(test)))]
#[macro_use]
extern crate alloc;

#[macro_use]
extern crate cfg_if;

cfg_if! {
    if #[cfg(all(not(feature = "std"), not(test)))] {
        use alloc::boxed::Box;
    } else {
        use std::boxed::Box;
    }
}

#[cfg(any(feature = "api", test))]
pub mod api;
#[cfg(any(feature = "engine", test))]
pub mod engine;

// ================================================================
// Providers
//
// Providers allow the engine to run in different contexts by
// plugging in implementations of the few ambient services it needs:
// logging and a uniform randomness source. A unit test maps logging
// to `println!` and randomness to a fixed sequence; a production
// host maps them onto whatever its executor offers.
// ================================================================

/// A logging provider maps engine messages onto the host's log
/// sink. Levels are given by [`LogLevel`].
pub trait LogProvider {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{}", level_s)
    }
}

#[cfg(any(feature = "std", test))]
#[derive(Clone, Copy)]
pub struct PrintlnLog {}

#[cfg(any(feature = "std", test))]
impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{} {}", level, msg);
    }
}

/// A source of uniformly distributed `u32` values.
///
/// The sample action consumes one value per evaluation. The provider
/// is owned by a single executor context, so implementations need no
/// internal synchronization.
pub trait RandProvider {
    fn next_u32(&self) -> u32;
}

/// An xorshift generator seeded by the host.
///
/// Statistical quality is all the sample action asks for; hosts
/// wanting stronger randomness supply their own provider.
pub struct Xorshift32 {
    state: Cell<u32>,
}

impl Xorshift32 {
    /// Create a new generator. A zero seed is coerced to a fixed
    /// non-zero value, as xorshift has an all-zero fixpoint.
    pub fn new(seed: u32) -> Self {
        let seed = if seed == 0 { 0x6b8b4567 } else { seed };
        Self { state: Cell::new(seed) }
    }
}

impl RandProvider for Xorshift32 {
    fn next_u32(&self) -> u32 {
        let mut x = self.state.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state.set(x);
        x
    }
}

/// The execution context: the bundle of providers handed to the
/// engine by the host.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
    pub rand: Box<dyn RandProvider>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn xorshift_nonzero_stream() {
        let prng = Xorshift32::new(0);
        for _ in 0..64 {
            assert_ne!(prng.next_u32(), 0);
        }
    }

    #[test]
    fn xorshift_deterministic() {
        let a = Xorshift32::new(7);
        let b = Xorshift32::new(7);
        assert_eq!(a.next_u32(), b.next_u32());
        assert_eq!(a.next_u32(), b.next_u32());
    }
}
