// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! UDP header.
//!
//! UDP's checksum field is optional: all-zero means "not computed".
//! A datagram sent without one keeps none through rewrites, and a
//! computed checksum that lands on zero is mangled to all-ones so it
//! is never mistaken for the absent case.

use super::flow::FlowKey;
use super::packet::Packet;
use super::tcp::set_tp_port;
use super::ExecError;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::Unaligned;

pub const UDP_HDR_SZ: usize = size_of::<UdpHdrRaw>();
pub const UDP_CSUM_OFF: usize = 6;

/// The on-wire stand-in for a computed checksum of zero.
pub const UDP_CSUM_MANGLED_0: [u8; 2] = [0xFF, 0xFF];

#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct UdpHdrRaw {
    pub src: [u8; 2],
    pub dst: [u8; 2],
    pub len: [u8; 2],
    pub csum: [u8; 2],
}

/// Rewrite one UDP port honoring the zero-checksum convention.
fn set_udp_port(pkt: &mut Packet, port_off: usize, new_port: u16) {
    let tp = pkt.transport_offset();
    let check_off = tp + UDP_CSUM_OFF;
    let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];

    if stored != [0, 0] && !pkt.is_csum_partial() {
        set_tp_port(pkt, port_off, check_off, new_port);

        let now = [pkt.data()[check_off], pkt.data()[check_off + 1]];
        if now == [0, 0] {
            pkt.data_mut()[check_off..check_off + 2]
                .copy_from_slice(&UDP_CSUM_MANGLED_0);
        }
    } else {
        pkt.data_mut()[port_off..port_off + 2]
            .copy_from_slice(&new_port.to_be_bytes());
        pkt.clear_hash();
    }
}

/// Apply a UDP set action: rewrite whichever ports differ.
pub fn set_udp(
    pkt: &mut Packet,
    key: &mut FlowKey,
    src: u16,
    dst: u16,
) -> Result<(), ExecError> {
    let tp = pkt.transport_offset();
    pkt.ensure_writable(tp + UDP_HDR_SZ)?;

    let (cur_src, cur_dst) = {
        let hdr = super::raw_hdr::<UdpHdrRaw>(&pkt.data()[tp..])?;
        (u16::from_be_bytes(hdr.src), u16::from_be_bytes(hdr.dst))
    };

    if src != cur_src {
        set_udp_port(pkt, tp, src);
        key.tp.src = src;
    }

    if dst != cur_dst {
        set_udp_port(pkt, tp + 2, dst);
        key.tp.dst = dst;
    }

    Ok(())
}
