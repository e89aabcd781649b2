// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! Ethernet header.

use super::flow::FlowKey;
use super::packet::Packet;
use super::ExecError;
use crate::api::MacAddr;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::Unaligned;

pub const ETHER_ADDR_LEN: usize = 6;
pub const ETHER_HDR_SZ: usize = size_of::<EtherHdrRaw>();

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const ETHER_TYPE_QINQ: u16 = 0x88A8;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
pub const ETHER_TYPE_MPLS: u16 = 0x8847;
pub const ETHER_TYPE_MPLS_MCAST: u16 = 0x8848;

/// Is this ethertype one of the MPLS pair?
pub fn eth_p_mpls(ether_type: u16) -> bool {
    ether_type == ETHER_TYPE_MPLS || ether_type == ETHER_TYPE_MPLS_MCAST
}

/// The Ethernet header as it sits on the wire. Packet offsets carry
/// no alignment guarantee, so every field is byte-granular.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct EtherHdrRaw {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ether_type: [u8; 2],
}

/// Rewrite the Ethernet source and destination addresses.
pub fn set_eth_addr(
    pkt: &mut Packet,
    key: &mut FlowKey,
    src: MacAddr,
    dst: MacAddr,
) -> Result<(), ExecError> {
    let mac = pkt.mac_offset();
    pkt.ensure_writable(mac + ETHER_HDR_SZ)?;

    let mut old = [0u8; ETHER_ADDR_LEN * 2];
    old.copy_from_slice(&pkt.data()[mac..mac + ETHER_ADDR_LEN * 2]);
    pkt.rcsum_sub(&old);

    let data = pkt.data_mut();
    let mut hdr = super::raw_hdr_mut::<EtherHdrRaw>(&mut data[mac..])?;
    hdr.dst = dst.bytes();
    hdr.src = src.bytes();

    let mut new = [0u8; ETHER_ADDR_LEN * 2];
    new[..ETHER_ADDR_LEN].copy_from_slice(&dst.bytes());
    new[ETHER_ADDR_LEN..].copy_from_slice(&src.bytes());
    pkt.rcsum_add(&new);

    key.eth.src = src;
    key.eth.dst = dst;
    Ok(())
}
