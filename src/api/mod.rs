// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! Types shared between the engine and the control plane.
//!
//! Everything in this module is serializable: the control plane
//! validates and builds these values and hands them to the engine,
//! which treats them as already checked.

pub mod action;
pub mod ip;
pub mod mac;

pub use action::*;
pub use ip::*;
pub use mac::*;

use serde::Deserialize;
use serde::Serialize;

/// Metadata describing the tunnel a packet should egress through,
/// attached by a tunnel set action and consumed by tunnel vports and
/// the upcall path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TunnelInfo {
    pub tun_id: u64,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tos: u8,
    pub ttl: u8,
    pub flags: u16,
    pub tp_src: u16,
    pub tp_dst: u16,
}
