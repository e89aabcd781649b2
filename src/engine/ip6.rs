// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! IPv6 header rewriting.
//!
//! IPv6 carries no header checksum, so address rewrites only feed
//! the transport checksum via the pseudo-header. The destination is
//! special: when a Routing extension header is present the address
//! in the fixed header is not the one L4 checksummed against, so the
//! transport update is skipped.

use super::checksum::proto_csum_replace16;
use super::flow::FlowKey;
use super::packet::Packet;
use super::raw_hdr;
use super::tcp::TCP_CSUM_OFF;
use super::tcp::TCP_HDR_SZ;
use super::udp::UDP_CSUM_MANGLED_0;
use super::udp::UDP_CSUM_OFF;
use super::udp::UDP_HDR_SZ;
use super::ExecError;
use crate::api::ip::IPPROTO_ICMPV6;
use crate::api::ip::IPPROTO_TCP;
use crate::api::ip::IPPROTO_UDP;
use crate::api::Ipv6Addr;
use crate::api::Ipv6SetSpec;
use core::mem::size_of;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::Unaligned;

pub const IPV6_HDR_SZ: usize = size_of::<Ipv6HdrRaw>();

pub const ICMPV6_CSUM_OFF: usize = 2;
pub const ICMPV6_HDR_SZ: usize = 8;

// Extension header protocol numbers.
pub const NEXTHDR_HOP: u8 = 0;
pub const NEXTHDR_ROUTING: u8 = 43;
pub const NEXTHDR_FRAGMENT: u8 = 44;
pub const NEXTHDR_AUTH: u8 = 51;
pub const NEXTHDR_DEST: u8 = 60;

/// The fixed IPv6 header. The first word packs version, traffic
/// class, and flow label; extension headers chain off `next_hdr`.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, AsBytes, Unaligned)]
pub struct Ipv6HdrRaw {
    pub ver_tc_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

/// Is this next-header value an extension header the engine walks
/// through?
pub fn is_ext_hdr(next_hdr: u8) -> bool {
    matches!(
        next_hdr,
        NEXTHDR_HOP
            | NEXTHDR_ROUTING
            | NEXTHDR_FRAGMENT
            | NEXTHDR_AUTH
            | NEXTHDR_DEST
    )
}

/// Walk the extension header chain looking for a Routing header.
///
/// The walk is defensive: a truncated chain simply ends it.
pub fn has_routing_header(pkt: &Packet) -> bool {
    let data = pkt.data();
    let net = pkt.network_offset();

    let first = match raw_hdr::<Ipv6HdrRaw>(&data[net..]) {
        Ok(hdr) => hdr.next_hdr,
        Err(_) => return false,
    };

    let mut next = first;
    let mut off = net + IPV6_HDR_SZ;

    while is_ext_hdr(next) && off + 2 <= data.len() {
        if next == NEXTHDR_ROUTING {
            return true;
        }

        let ext_len = data[off + 1] as usize;
        let hdr_len = match next {
            NEXTHDR_FRAGMENT => 8,
            NEXTHDR_AUTH => (ext_len + 2) * 4,
            _ => (ext_len + 1) * 8,
        };

        next = data[off];
        off += hdr_len;
    }

    next == NEXTHDR_ROUTING
}

/// Reflect an address change into the transport checksum named by
/// `l4_proto`, when enough of the transport header is present.
fn update_transport_csum(
    pkt: &mut Packet,
    l4_proto: u8,
    old: [u8; 16],
    new: [u8; 16],
) {
    let tp = pkt.transport_offset();
    let transport_len = pkt.len().saturating_sub(tp);

    let (check_off, mangle) = match l4_proto {
        IPPROTO_TCP if transport_len >= TCP_HDR_SZ => {
            (tp + TCP_CSUM_OFF, false)
        }
        IPPROTO_UDP if transport_len >= UDP_HDR_SZ => {
            (tp + UDP_CSUM_OFF, true)
        }
        IPPROTO_ICMPV6 if transport_len >= ICMPV6_HDR_SZ => {
            (tp + ICMPV6_CSUM_OFF, false)
        }
        _ => return,
    };

    let stored = [pkt.data()[check_off], pkt.data()[check_off + 1]];
    if mangle && stored == [0, 0] && !pkt.is_csum_partial() {
        // A UDP datagram sent without a checksum keeps none.
        return;
    }

    let mut updated =
        proto_csum_replace16(stored, pkt.csum_mode_mut(), old, new, true);
    if mangle && updated == [0, 0] {
        updated = UDP_CSUM_MANGLED_0;
    }
    pkt.data_mut()[check_off..check_off + 2].copy_from_slice(&updated);
}

/// Rewrite one IPv6 address at `addr_off` within the header.
fn set_ipv6_addr(
    pkt: &mut Packet,
    l4_proto: u8,
    addr_off: usize,
    old: [u8; 16],
    new_addr: Ipv6Addr,
    recalc_csum: bool,
) {
    let new = new_addr.bytes();
    if recalc_csum {
        update_transport_csum(pkt, l4_proto, old, new);
    }

    pkt.clear_hash();
    let net = pkt.network_offset();
    pkt.data_mut()[net + addr_off..net + addr_off + 16]
        .copy_from_slice(&new);
}

/// Apply an IPv6 set action.
///
/// Addresses are diff-gated; traffic class, flow label, and hop
/// limit are written outright.
pub fn set_ipv6(
    pkt: &mut Packet,
    key: &mut FlowKey,
    spec: &Ipv6SetSpec,
) -> Result<(), ExecError> {
    let net = pkt.network_offset();
    pkt.ensure_writable(net + IPV6_HDR_SZ)?;

    let (src, dst, next_hdr) = {
        let hdr = raw_hdr::<Ipv6HdrRaw>(&pkt.data()[net..])?;
        (hdr.src, hdr.dst, hdr.next_hdr)
    };

    if spec.src.bytes() != src {
        set_ipv6_addr(pkt, spec.proto, 8, src, spec.src, true);
        key.ipv6.src = spec.src;
    }

    if spec.dst.bytes() != dst {
        let recalc_csum =
            if is_ext_hdr(next_hdr) { !has_routing_header(pkt) } else { true };
        set_ipv6_addr(pkt, spec.proto, 24, dst, spec.dst, recalc_csum);
        key.ipv6.dst = spec.dst;
    }

    {
        let data = pkt.data_mut();

        // Traffic class straddles the first two bytes, split around
        // the version nibble and the flow label.
        data[net] = (data[net] & 0xF0) | (spec.tclass >> 4);
        data[net + 1] = (data[net + 1] & 0x0F) | ((spec.tclass & 0x0F) << 4);
        key.ip.tos = spec.tclass;

        // The 20-bit flow label keeps the traffic class nibble above
        // it intact.
        data[net + 1] =
            (data[net + 1] & 0xF0) | ((spec.label >> 16) & 0x0F) as u8;
        data[net + 2] = (spec.label >> 8) as u8;
        data[net + 3] = spec.label as u8;

        data[net + 7] = spec.hlimit;
    }

    let d = pkt.data();
    key.ipv6.label = u32::from_be_bytes([
        d[net],
        d[net + 1],
        d[net + 2],
        d[net + 3],
    ]) & 0x000F_FFFF;
    key.ip.ttl = spec.hlimit;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::ether::{ETHER_HDR_SZ, ETHER_TYPE_IPV6};

    // `first` is the fixed header's next-header value; `ext` holds
    // any raw extension chain bytes placed before an 8-byte
    // transport header.
    fn ip6_udp_packet(first: u8, ext: &[u8]) -> Packet {
        let mut bytes = vec![0u8; ETHER_HDR_SZ + IPV6_HDR_SZ];
        bytes[12..14].copy_from_slice(&ETHER_TYPE_IPV6.to_be_bytes());
        let net = ETHER_HDR_SZ;
        bytes[net] = 0x60;
        bytes[net + 6] = first;
        bytes[net + 7] = 64;
        bytes[net + 8..net + 24].copy_from_slice(&[0x20; 16]);
        bytes[net + 24..net + 40].copy_from_slice(&[0x30; 16]);
        bytes.extend_from_slice(ext);
        bytes.extend_from_slice(&[0u8; 8]);

        let mut pkt = Packet::from_slice(&bytes);
        pkt.set_mac_len(ETHER_HDR_SZ);
        pkt.set_network_offset(net);
        pkt.set_transport_offset(net + IPV6_HDR_SZ + ext.len());
        pkt.set_protocol(ETHER_TYPE_IPV6);
        pkt
    }

    #[test]
    fn tclass_and_label_surgery() {
        let mut pkt = ip6_udp_packet(IPPROTO_UDP, &[]);
        let mut key = FlowKey::default();
        key.eth.ether_type = ETHER_TYPE_IPV6;

        let net = pkt.network_offset();
        let spec = Ipv6SetSpec {
            src: Ipv6Addr::from([0x20; 16]),
            dst: Ipv6Addr::from([0x30; 16]),
            label: 0x000A_BCDE,
            tclass: 0xB8,
            hlimit: 17,
            proto: IPPROTO_UDP,
        };
        set_ipv6(&mut pkt, &mut key, &spec).unwrap();

        let d = pkt.data();
        // Version nibble untouched.
        assert_eq!(d[net] >> 4, 6);
        assert_eq!(d[net] & 0x0F, 0xB8 >> 4);
        assert_eq!(d[net + 1] >> 4, 0xB8 & 0x0F);
        assert_eq!(d[net + 1] & 0x0F, 0x0A);
        assert_eq!(d[net + 2], 0xBC);
        assert_eq!(d[net + 3], 0xDE);
        assert_eq!(d[net + 7], 17);
        assert_eq!(key.ipv6.label, 0x000A_BCDE);
        assert_eq!(key.ip.tos, 0xB8);
        assert_eq!(key.ip.ttl, 17);
    }

    #[test]
    fn routing_header_found() {
        // A destination-options header chaining to a routing header,
        // which itself chains to UDP.
        let mut ext = [0u8; 16];
        ext[0] = NEXTHDR_ROUTING;
        ext[8] = IPPROTO_UDP;
        let pkt = ip6_udp_packet(NEXTHDR_DEST, &ext);
        assert!(has_routing_header(&pkt));
    }

    #[test]
    fn no_routing_header() {
        let pkt = ip6_udp_packet(IPPROTO_UDP, &[]);
        assert!(!has_routing_header(&pkt));

        let mut ext = [0u8; 8];
        ext[0] = IPPROTO_UDP;
        let pkt = ip6_udp_packet(NEXTHDR_DEST, &ext);
        assert!(!has_routing_header(&pkt));
    }

    #[test]
    fn zero_udp_csum_left_alone() {
        let mut pkt = ip6_udp_packet(IPPROTO_UDP, &[]);
        let mut key = FlowKey::default();
        key.eth.ether_type = ETHER_TYPE_IPV6;

        let spec = Ipv6SetSpec {
            src: Ipv6Addr::from([0x21; 16]),
            dst: Ipv6Addr::from([0x30; 16]),
            label: 0,
            tclass: 0,
            hlimit: 64,
            proto: IPPROTO_UDP,
        };
        set_ipv6(&mut pkt, &mut key, &spec).unwrap();

        let tp = pkt.transport_offset();
        assert_eq!(&pkt.data()[tp + 6..tp + 8], &[0, 0]);
        assert_eq!(key.ipv6.src, spec.src);
    }
}
