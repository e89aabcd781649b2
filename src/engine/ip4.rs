// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! IPv4 header rewriting.
//!
//! Address rewrites ripple into the transport checksum (the
//! addresses feed the pseudo-header); tos and ttl only touch the
//! IPv4 header checksum. Every update is incremental.

use super::checksum::csum_replace2;
use super::checksum::csum_replace4;
use super::checksum::proto_csum_replace4;
use super::flow::FlowKey;
use super::packet::Packet;
use super::raw_hdr;
use super::tcp::TCP_CSUM_OFF;
use super::tcp::TCP_HDR_SZ;
use super::udp::UDP_CSUM_MANGLED_0;
use super::udp::UDP_CSUM_OFF;
use super::udp::UDP_HDR_SZ;
use super::ExecError;
use crate::api::ip::IPPROTO_TCP;
use crate::api::ip::IPPROTO_UDP;
use crate::api::Ipv4Addr;
use crate::api::Ipv4SetSpec;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::Unaligned;

pub const IPV4_HDR_SZ: usize = size_of::<Ipv4HdrRaw>();

/// The 20-byte fixed IPv4 header. Options, when present, follow it;
/// the editors here never touch them.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct Ipv4HdrRaw {
    pub ver_ihl: u8,
    pub tos: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_off: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

/// Which address of the pair an update targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AddrField {
    Src,
    Dst,
}

impl AddrField {
    fn offset(self) -> usize {
        match self {
            Self::Src => 12,
            Self::Dst => 16,
        }
    }
}

/// Rewrite one IPv4 address, updating the header checksum and, when
/// a TCP or UDP header is present, the transport checksum.
fn set_ip_addr(
    pkt: &mut Packet,
    field: AddrField,
    new_addr: Ipv4Addr,
) -> Result<(), ExecError> {
    let net = pkt.network_offset();
    let tp = pkt.transport_offset();
    let transport_len = pkt.len().saturating_sub(tp);

    let (proto, old_addr) = {
        let hdr = raw_hdr::<Ipv4HdrRaw>(&pkt.data()[net..])?;
        let old = match field {
            AddrField::Src => hdr.src,
            AddrField::Dst => hdr.dst,
        };
        (hdr.proto, old)
    };
    let new = new_addr.bytes();

    if proto == IPPROTO_TCP {
        if transport_len >= TCP_HDR_SZ {
            let check_off = tp + TCP_CSUM_OFF;
            let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];
            let updated = proto_csum_replace4(
                stored,
                pkt.csum_mode_mut(),
                old_addr,
                new,
                true,
            );
            pkt.data_mut()[check_off..check_off + 2]
                .copy_from_slice(&updated);
        }
    } else if proto == IPPROTO_UDP {
        if transport_len >= UDP_HDR_SZ {
            let check_off = tp + UDP_CSUM_OFF;
            let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];

            if stored != [0, 0] || pkt.is_csum_partial() {
                let mut updated = proto_csum_replace4(
                    stored,
                    pkt.csum_mode_mut(),
                    old_addr,
                    new,
                    true,
                );
                if updated == [0, 0] {
                    updated = UDP_CSUM_MANGLED_0;
                }
                pkt.data_mut()[check_off..check_off + 2]
                    .copy_from_slice(&updated);
            }
        }
    }

    // The addresses are covered by the header checksum as well.
    let check_off = net + 10;
    let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];
    let updated = csum_replace4(stored, old_addr, new);

    let addr_off = net + field.offset();
    let data = pkt.data_mut();
    data[check_off..check_off + 2].copy_from_slice(&updated);
    data[addr_off..addr_off + 4].copy_from_slice(&new);

    pkt.clear_hash();
    Ok(())
}

/// Rewrite the ttl, patching the header checksum over the (ttl,
/// protocol) word.
fn set_ip_ttl(pkt: &mut Packet, new_ttl: u8) {
    let net = pkt.network_offset();
    let check_off = net + 10;
    let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];
    let old_ttl = pkt.data()[net + 8];
    let updated = csum_replace2(stored, [old_ttl, 0], [new_ttl, 0]);

    let data = pkt.data_mut();
    data[check_off..check_off + 2].copy_from_slice(&updated);
    data[net + 8] = new_ttl;
}

/// Rewrite the dsfield (DSCP + ECN), patching the header checksum
/// over the (version, tos) word.
fn set_ip_tos(pkt: &mut Packet, new_tos: u8) {
    let net = pkt.network_offset();
    let check_off = net + 10;
    let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];
    let old_tos = pkt.data()[net + 1];
    let updated = csum_replace2(stored, [0, old_tos], [0, new_tos]);

    let data = pkt.data_mut();
    data[check_off..check_off + 2].copy_from_slice(&updated);
    data[net + 1] = new_tos;
}

/// Apply an IPv4 set action: each field which differs from the
/// packet is rewritten and mirrored into the key.
pub fn set_ipv4(
    pkt: &mut Packet,
    key: &mut FlowKey,
    spec: &Ipv4SetSpec,
) -> Result<(), ExecError> {
    let net = pkt.network_offset();
    pkt.ensure_writable(net + IPV4_HDR_SZ)?;

    let (src, dst, tos, ttl) = {
        let hdr = raw_hdr::<Ipv4HdrRaw>(&pkt.data()[net..])?;
        (hdr.src, hdr.dst, hdr.tos, hdr.ttl)
    };

    if spec.src.bytes() != src {
        set_ip_addr(pkt, AddrField::Src, spec.src)?;
        key.ipv4.src = spec.src;
    }

    if spec.dst.bytes() != dst {
        set_ip_addr(pkt, AddrField::Dst, spec.dst)?;
        key.ipv4.dst = spec.dst;
    }

    if spec.tos != tos {
        set_ip_tos(pkt, spec.tos);
        key.ip.tos = spec.tos;
    }

    if spec.ttl != ttl {
        set_ip_ttl(pkt, spec.ttl);
        key.ip.ttl = spec.ttl;
    }

    Ok(())
}
