// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! The flow key: the classifier-visible attributes of a packet.
//!
//! The key rides alongside the packet through action execution.
//! Editors keep it coherent: after any successful action the key
//! either describes the current packet bytes or has been invalidated
//! for re-extraction. Validity is tagged by the ethertype -- a key
//! with `eth.ether_type == 0` must be re-parsed before anything
//! trusts it.

use crate::api::Ipv4Addr;
use crate::api::Ipv6Addr;
use crate::api::MacAddr;
use serde::Deserialize;
use serde::Serialize;

/// Physical-layer packet metadata.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PhyKey {
    pub priority: u32,
    pub mark: u32,
}

/// Ethernet attributes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EthKey {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub tci: u16,
    pub ether_type: u16,
}

/// Attributes shared by IPv4 and IPv6.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct IpKey {
    pub tos: u8,
    pub ttl: u8,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv4AddrKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv6AddrKey {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub label: u32,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MplsKey {
    pub top_lse: u32,
}

/// Transport ports.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TpKey {
    pub src: u16,
    pub dst: u16,
}

/// The classification key for a packet.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowKey {
    pub recirc_id: u32,
    pub flow_hash: u32,
    pub phy: PhyKey,
    pub eth: EthKey,
    pub ip: IpKey,
    pub ipv4: Ipv4AddrKey,
    pub ipv6: Ipv6AddrKey,
    pub mpls: MplsKey,
    pub tp: TpKey,
}

impl FlowKey {
    /// Whether the key still describes the packet. An editor which
    /// restructures L2 (or anything else it cannot patch in place)
    /// invalidates the key, and recirculation re-extracts it.
    pub fn is_valid(&self) -> bool {
        self.eth.ether_type != 0
    }

    /// Mark the key as no longer describing the packet.
    pub fn invalidate(&mut self) {
        self.eth.ether_type = 0;
    }
}

const JHASH_INITVAL: u32 = 0xdeadbeef;

/// Mix a single word with an initial basis, Jenkins style.
///
/// Used by the hash action to fold the action's basis into the
/// packet's flow hash.
pub fn jhash_1word(a: u32, initval: u32) -> u32 {
    let mut a = a.wrapping_add(JHASH_INITVAL.wrapping_add(initval).wrapping_add(4));
    let mut b = JHASH_INITVAL.wrapping_add(initval).wrapping_add(4);
    let mut c = b;

    // Final mix.
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));

    c
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validity_sentinel() {
        let mut key = FlowKey::default();
        assert!(!key.is_valid());
        key.eth.ether_type = 0x0800;
        assert!(key.is_valid());
        key.invalidate();
        assert!(!key.is_valid());
    }

    #[test]
    fn jhash_mixes() {
        let h = jhash_1word(0x12345678, 0);
        assert_ne!(h, 0x12345678);
        // Deterministic for a given (word, basis) pair.
        assert_eq!(h, jhash_1word(0x12345678, 0));
        assert_ne!(h, jhash_1word(0x12345678, 1));
    }
}
