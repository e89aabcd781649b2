// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! MPLS label stack editing.
//!
//! The label stack sits between the end of the L2 header and the
//! network header, so `mac_len` is the anchor for every operation
//! here: the top label stack entry always starts at
//! `mac_header_end`.

use super::ether::eth_p_mpls;
use super::flow::FlowKey;
use super::packet::Packet;
use super::ExecError;

/// Size of one label stack entry.
pub const MPLS_HLEN: usize = 4;

/// Push a label stack entry, making `ethertype` the packet's outer
/// protocol.
pub fn push_mpls(
    pkt: &mut Packet,
    key: &mut FlowKey,
    lse: u32,
    ethertype: u16,
) -> Result<(), ExecError> {
    pkt.push_front(MPLS_HLEN)?;

    let mac_len = pkt.mac_len();
    let lse_bytes = lse.to_be_bytes();
    let et_bytes = ethertype.to_be_bytes();

    {
        let data = pkt.data_mut();
        // Move the L2 header into the fresh front bytes; the gap it
        // leaves behind is where the new top of stack goes.
        data.copy_within(MPLS_HLEN..MPLS_HLEN + mac_len, 0);
        data[mac_len..mac_len + MPLS_HLEN].copy_from_slice(&lse_bytes);
        data[12..14].copy_from_slice(&et_bytes);
    }

    pkt.reset_mac_header();
    pkt.rcsum_add(&lse_bytes);

    if pkt.inner_protocol().is_none() {
        let current = pkt.protocol();
        pkt.set_inner_protocol(current);
    }

    pkt.set_protocol(ethertype);
    key.invalidate();
    Ok(())
}

/// Pop the top label stack entry and expose `ethertype` in the L2
/// header's type field.
pub fn pop_mpls(
    pkt: &mut Packet,
    key: &mut FlowKey,
    ethertype: u16,
) -> Result<(), ExecError> {
    let mac_len = pkt.mac_len();
    pkt.ensure_writable(mac_len + MPLS_HLEN)?;

    let mut lse = [0u8; MPLS_HLEN];
    lse.copy_from_slice(&pkt.data()[mac_len..mac_len + MPLS_HLEN]);
    pkt.rcsum_sub(&lse);

    pkt.data_mut().copy_within(0..mac_len, MPLS_HLEN);
    pkt.pull_front(MPLS_HLEN);
    pkt.reset_mac_header();

    // The type field is found from the end of the L2 header so that
    // in-packet VLAN tags are accounted for.
    let end = pkt.mac_header_end();
    pkt.data_mut()[end - 2..end].copy_from_slice(&ethertype.to_be_bytes());

    if eth_p_mpls(pkt.protocol()) {
        pkt.set_protocol(ethertype);
    }

    key.invalidate();
    Ok(())
}

/// Overwrite the top label stack entry.
pub fn set_mpls(
    pkt: &mut Packet,
    key: &mut FlowKey,
    lse: u32,
) -> Result<(), ExecError> {
    let mac_len = pkt.mac_len();
    pkt.ensure_writable(mac_len + MPLS_HLEN)?;

    let mut old = [0u8; MPLS_HLEN];
    old.copy_from_slice(&pkt.data()[mac_len..mac_len + MPLS_HLEN]);
    let new = lse.to_be_bytes();

    if let super::packet::CsumMode::Complete(csum) = pkt.csum_mode_mut() {
        csum.rewrite_field(&old, &new);
    }

    pkt.data_mut()[mac_len..mac_len + MPLS_HLEN].copy_from_slice(&new);
    key.mpls.top_lse = lse;
    Ok(())
}
