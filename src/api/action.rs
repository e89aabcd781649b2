// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! Flow actions.
//!
//! A flow's behavior is an ordered list of actions. The control
//! plane validates the list when the flow is installed; the engine
//! walks it once per packet. Nested lists (sampling) share storage
//! with the installed flow via [`ActionList`], which is cheap to
//! clone when a copy of a sub-list must outlive the current walk.

use super::ip::Ipv4Addr;
use super::ip::Ipv6Addr;
use super::mac::MacAddr;
use super::TunnelInfo;
use core::ops::Deref;
use serde::Deserialize;
use serde::Serialize;

cfg_if! {
    if #[cfg(all(not(feature = "std"), not(test)))] {
        use alloc::sync::Arc;
        use alloc::vec::Vec;
    } else {
        use std::sync::Arc;
        use std::vec::Vec;
    }
}

/// A reference-counted, immutable action list.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(from = "Vec<Action>")]
pub struct ActionList(Arc<[Action]>);

impl ActionList {
    pub fn as_slice(&self) -> &[Action] {
        &self.0
    }
}

impl Deref for ActionList {
    type Target = [Action];

    fn deref(&self) -> &[Action] {
        &self.0
    }
}

impl From<Vec<Action>> for ActionList {
    fn from(actions: Vec<Action>) -> Self {
        Self(actions.into())
    }
}

/// One step of a flow's behavior.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Action {
    /// Send the packet out the given virtual port.
    Output(u32),

    /// Deliver the packet to a userspace listener.
    Userspace(UserspaceSpec),

    /// Compute an L4 flow hash mixed with `basis` and record it in
    /// the flow key.
    Hash { basis: u32 },

    /// Push an MPLS label stack entry, making `ethertype` (unicast
    /// or multicast MPLS) the packet's outer protocol.
    PushMpls { lse: u32, ethertype: u16 },

    /// Pop the top MPLS label stack entry and restore `ethertype` as
    /// the exposed protocol.
    PopMpls { ethertype: u16 },

    /// Push an 802.1Q/802.1ad tag.
    PushVlan(VlanTag),

    /// Pop the outermost VLAN tag, hardware-offloaded or in-packet.
    PopVlan,

    /// Re-enter classification with the given recirculation id
    /// carried in the flow key.
    Recirc(u32),

    /// Rewrite one header or one piece of packet metadata.
    Set(SetAction),

    /// Probabilistically run a nested action list.
    ///
    /// A fresh uniform `u32` below `probability` selects the packet.
    Sample { probability: u32, actions: ActionList },
}

/// The target of a set action.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum SetAction {
    Priority(u32),
    Mark(u32),
    Tunnel(TunnelInfo),
    Ethernet { src: MacAddr, dst: MacAddr },
    Ipv4(Ipv4SetSpec),
    Ipv6(Ipv6SetSpec),
    Tcp { src: u16, dst: u16 },
    Udp { src: u16, dst: u16 },
    Sctp { src: u16, dst: u16 },
    Mpls { lse: u32 },
}

/// Replacement IPv4 header fields.
///
/// All fields are present; the editor only touches those which
/// differ from the packet. `proto` mirrors the header and is not
/// writable.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Ipv4SetSpec {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tos: u8,
    pub ttl: u8,
    pub proto: u8,
}

/// Replacement IPv6 header fields.
///
/// `proto` names the upper-layer protocol so the editor knows which
/// transport checksum the address rewrite feeds into.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Ipv6SetSpec {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub label: u32,
    pub tclass: u8,
    pub hlimit: u8,
    pub proto: u8,
}

/// Parameters of a userspace delivery.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UserspaceSpec {
    /// Opaque bytes handed back to the listener untouched.
    pub userdata: Option<Vec<u8>>,

    /// The destination listener.
    pub pid: u32,

    /// When set, resolve this port to its egress tunnel description
    /// and attach it to the upcall.
    pub egress_tun_port: Option<u32>,
}

/// An 802.1Q/802.1ad tag: tag protocol id plus tag control info.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VlanTag {
    pub tpid: u16,
    pub tci: u16,
}
