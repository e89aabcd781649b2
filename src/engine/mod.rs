// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! The engine: buffer view, header editors, and the interpreter.
//!
//! All code under this namespace is guarded by the `engine` feature flag.
pub mod actions;
pub mod checksum;
pub mod ether;
pub mod flow;
pub mod ip4;
pub mod ip6;
pub mod mpls;
pub mod packet;
pub mod port;
pub mod sctp;
pub mod tcp;
pub mod udp;
pub mod vlan;

use core::fmt;
use core::fmt::Display;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::LayoutVerified;
use zerocopy::Unaligned;

/// The ways executing an action list can fail.
///
/// `Inval` is reserved for the validation layer which builds action
/// lists; the engine itself never produces it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecError {
    OutOfMemory,
    Loop,
    Inval,
}

impl Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Loop => write!(f, "packet loop"),
            Self::Inval => write!(f, "invalid argument"),
        }
    }
}

/// View a raw header at the front of `src`.
///
/// The caller has already verified the length; a short slice still
/// maps to the same error a failed header pull produces.
pub(crate) fn raw_hdr<T: FromBytes + Unaligned>(
    src: &[u8],
) -> Result<LayoutVerified<&[u8], T>, ExecError> {
    LayoutVerified::new_unaligned_from_prefix(src)
        .map(|(hdr, _)| hdr)
        .ok_or(ExecError::OutOfMemory)
}

/// Like [`raw_hdr`], but mutable.
pub(crate) fn raw_hdr_mut<T: FromBytes + AsBytes + Unaligned>(
    src: &mut [u8],
) -> Result<LayoutVerified<&mut [u8], T>, ExecError> {
    LayoutVerified::new_unaligned_from_prefix(src)
        .map(|(hdr, _)| hdr)
        .ok_or(ExecError::OutOfMemory)
}
