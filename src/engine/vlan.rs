// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! VLAN tag push and pop.
//!
//! The outermost tag normally lives in the packet's hardware offload
//! slot rather than in the bytes. Pushing over an occupied slot
//! first materializes the old tag into the frame; popping prefers
//! the slot and falls back to surgery on the bytes, promoting a
//! second in-packet tag back into the slot when one is exposed.

use super::ether::ETHER_ADDR_LEN;
use super::ether::ETHER_HDR_SZ;
use super::ether::ETHER_TYPE_VLAN;
use super::flow::FlowKey;
use super::packet::Packet;
use super::ExecError;
use crate::api::VlanTag;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::Unaligned;

pub const VLAN_HLEN: usize = size_of::<VlanHdrRaw>();
pub const VLAN_ETH_HLEN: usize = ETHER_HDR_SZ + VLAN_HLEN;

/// The 802.1Q header as it sits after the TPID: tag control info
/// followed by the encapsulated ethertype.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct VlanHdrRaw {
    pub tci: [u8; 2],
    pub inner_type: [u8; 2],
}

/// Remove the in-packet VLAN header, returning its TCI.
///
/// The inner ethertype takes over as the packet's protocol and the
/// mac header shrinks accordingly.
fn pop_vlan_tci(pkt: &mut Packet) -> Result<u16, ExecError> {
    pkt.ensure_writable(VLAN_ETH_HLEN)?;

    let mut tag = [0u8; VLAN_HLEN];
    tag.copy_from_slice(
        &pkt.data()[ETHER_ADDR_LEN * 2..ETHER_ADDR_LEN * 2 + VLAN_HLEN],
    );
    pkt.rcsum_sub(&tag);

    let data = pkt.data_mut();
    let (tci, inner_type) = {
        let hdr = super::raw_hdr::<VlanHdrRaw>(&data[ETHER_HDR_SZ..])?;
        (u16::from_be_bytes(hdr.tci), u16::from_be_bytes(hdr.inner_type))
    };

    // Slide the address pair over the departing tag.
    data.copy_within(0..ETHER_ADDR_LEN * 2, VLAN_HLEN);
    pkt.pull_front(VLAN_HLEN);
    pkt.reset_mac_header();

    pkt.set_protocol(inner_type);
    // Keep mac_len honest for any MPLS action that follows.
    pkt.set_mac_len(pkt.mac_len() - VLAN_HLEN);

    Ok(tci)
}

/// Pop the outermost VLAN tag.
pub fn pop_vlan(pkt: &mut Packet, key: &mut FlowKey) -> Result<(), ExecError> {
    if pkt.vlan_tag().is_some() {
        pkt.set_vlan_tag(None);
    } else {
        if pkt.protocol() != ETHER_TYPE_VLAN || pkt.len() < VLAN_ETH_HLEN {
            return Ok(());
        }

        pop_vlan_tci(pkt)?;
    }

    // If no further in-packet tag was exposed we are done.
    if pkt.protocol() != ETHER_TYPE_VLAN || pkt.len() < VLAN_ETH_HLEN {
        key.eth.tci = 0;
        return Ok(());
    }

    // A stacked tag remains: move it into the offload slot.
    key.invalidate();
    let tci = pop_vlan_tci(pkt)?;
    pkt.set_vlan_tag(Some(VlanTag { tpid: ETHER_TYPE_VLAN, tci }));
    Ok(())
}

/// Write `tag` into the packet bytes after the address pair.
fn put_vlan_tag(pkt: &mut Packet, tag: VlanTag) -> Result<(), ExecError> {
    pkt.push_front(VLAN_HLEN)?;

    let data = pkt.data_mut();
    data.copy_within(VLAN_HLEN..VLAN_HLEN + ETHER_ADDR_LEN * 2, 0);
    data[ETHER_ADDR_LEN * 2..ETHER_ADDR_LEN * 2 + 2]
        .copy_from_slice(&tag.tpid.to_be_bytes());
    data[ETHER_ADDR_LEN * 2 + 2..ETHER_ADDR_LEN * 2 + 4]
        .copy_from_slice(&tag.tci.to_be_bytes());

    pkt.reset_mac_header();
    pkt.set_protocol(tag.tpid);

    let mut inserted = [0u8; VLAN_HLEN];
    inserted[0..2].copy_from_slice(&tag.tpid.to_be_bytes());
    inserted[2..4].copy_from_slice(&tag.tci.to_be_bytes());
    pkt.rcsum_add(&inserted);
    Ok(())
}

/// Push a VLAN tag.
///
/// On failure the packet has been consumed; the caller must not
/// touch it again.
pub fn push_vlan(
    pkt: &mut Packet,
    key: &mut FlowKey,
    tag: VlanTag,
) -> Result<(), ExecError> {
    if let Some(current) = pkt.vlan_tag() {
        // Push down the tag currently occupying the offload slot.
        put_vlan_tag(pkt, current)?;
        pkt.set_mac_len(pkt.mac_len() + VLAN_HLEN);
        key.invalidate();
    } else {
        key.eth.tci = tag.tci;
    }

    pkt.set_vlan_tag(Some(tag));
    Ok(())
}
