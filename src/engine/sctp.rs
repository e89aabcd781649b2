// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! SCTP header.
//!
//! SCTP checksums with CRC32-C over the whole region rather than a
//! ones-complement sum, so a port rewrite recomputes. The stored
//! value is patched with the XOR of the old and new correct CRCs:
//! a packet that arrived with a broken checksum stays exactly as
//! broken, and downstream validators still reject it.

use super::flow::FlowKey;
use super::packet::Packet;
use super::ExecError;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::Unaligned;

pub const SCTP_HDR_SZ: usize = size_of::<SctpHdrRaw>();
pub const SCTP_CSUM_OFF: usize = 8;

/// The SCTP common header: ports, verification tag, CRC.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct SctpHdrRaw {
    pub src: [u8; 2],
    pub dst: [u8; 2],
    pub vtag: [u8; 4],
    pub csum: [u8; 4],
}

// Reflected CRC32-C (Castagnoli) polynomial.
const CRC32C_POLY: u32 = 0x82F6_3B78;

fn crc32c_update(mut crc: u32, bytes: &[u8]) -> u32 {
    for b in bytes {
        crc ^= *b as u32;
        for _ in 0..8 {
            let low = crc & 1;
            crc >>= 1;
            if low != 0 {
                crc ^= CRC32C_POLY;
            }
        }
    }
    crc
}

/// CRC32-C over `bytes`.
pub fn crc32c(bytes: &[u8]) -> u32 {
    !crc32c_update(!0, bytes)
}

/// The correct checksum over the packet's SCTP region starting at
/// `off`, computed as if the checksum field held zero.
pub fn sctp_csum(pkt: &Packet, off: usize) -> u32 {
    let data = pkt.data();
    let csum_off = off + SCTP_CSUM_OFF;

    let mut crc = !0u32;
    crc = crc32c_update(crc, &data[off..csum_off]);
    crc = crc32c_update(crc, &[0, 0, 0, 0]);
    crc = crc32c_update(crc, &data[csum_off + 4..]);
    !crc
}

/// Apply an SCTP set action.
///
/// Both ports are written together under one checksum rewrite, and
/// any pre-existing checksum error is carried through.
pub fn set_sctp(
    pkt: &mut Packet,
    key: &mut FlowKey,
    src: u16,
    dst: u16,
) -> Result<(), ExecError> {
    let tp = pkt.transport_offset();
    pkt.ensure_writable(tp + SCTP_HDR_SZ)?;

    let (cur_src, cur_dst) = {
        let hdr = super::raw_hdr::<SctpHdrRaw>(&pkt.data()[tp..])?;
        (u16::from_be_bytes(hdr.src), u16::from_be_bytes(hdr.dst))
    };

    if src != cur_src || dst != cur_dst {
        let csum_off = tp + SCTP_CSUM_OFF;
        let old_stored = u32::from_le_bytes([
            pkt.data()[csum_off],
            pkt.data()[csum_off + 1],
            pkt.data()[csum_off + 2],
            pkt.data()[csum_off + 3],
        ]);
        let old_correct = sctp_csum(pkt, tp);

        {
            let data = pkt.data_mut();
            data[tp..tp + 2].copy_from_slice(&src.to_be_bytes());
            data[tp + 2..tp + 4].copy_from_slice(&dst.to_be_bytes());
        }

        let new_correct = sctp_csum(pkt, tp);
        let carried = old_stored ^ old_correct ^ new_correct;
        pkt.data_mut()[csum_off..csum_off + 4]
            .copy_from_slice(&carried.to_le_bytes());

        pkt.clear_hash();
        key.tp.src = src;
        key.tp.dst = dst;
    }

    Ok(())
}
