// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! TCP header.

use super::checksum::proto_csum_replace2;
use super::flow::FlowKey;
use super::packet::Packet;
use super::ExecError;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::Unaligned;

pub const TCP_HDR_SZ: usize = size_of::<TcpHdrRaw>();
pub const TCP_CSUM_OFF: usize = 16;

#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct TcpHdrRaw {
    pub src: [u8; 2],
    pub dst: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub win: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

/// Rewrite one transport port and patch the checksum at `check_off`.
///
/// Shared with UDP: ports are covered data, not pseudo-header, so a
/// `Partial` packet needs no stored-checksum change at all.
pub(crate) fn set_tp_port(
    pkt: &mut Packet,
    port_off: usize,
    check_off: usize,
    new_port: u16,
) {
    let old = [pkt.data()[port_off], pkt.data()[port_off + 1]];
    let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];
    let updated = proto_csum_replace2(
        stored,
        pkt.csum_mode_mut(),
        old,
        new_port.to_be_bytes(),
        false,
    );

    let data = pkt.data_mut();
    data[check_off..check_off + 2].copy_from_slice(&updated);
    data[port_off..port_off + 2].copy_from_slice(&new_port.to_be_bytes());
    pkt.clear_hash();
}

/// Apply a TCP set action: rewrite whichever ports differ.
pub fn set_tcp(
    pkt: &mut Packet,
    key: &mut FlowKey,
    src: u16,
    dst: u16,
) -> Result<(), ExecError> {
    let tp = pkt.transport_offset();
    pkt.ensure_writable(tp + TCP_HDR_SZ)?;

    let (cur_src, cur_dst) = {
        let hdr = super::raw_hdr::<TcpHdrRaw>(&pkt.data()[tp..])?;
        (u16::from_be_bytes(hdr.src), u16::from_be_bytes(hdr.dst))
    };

    if src != cur_src {
        set_tp_port(pkt, tp, tp + TCP_CSUM_OFF, src);
        key.tp.src = src;
    }

    if dst != cur_dst {
        set_tp_port(pkt, tp + 2, tp + TCP_CSUM_OFF, dst);
        key.tp.dst = dst;
    }

    Ok(())
}
