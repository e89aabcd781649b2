// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! The mutable view over a packet the engine edits in place.
//!
//! A [`Packet`] couples a byte buffer with the layer offsets the
//! classifier established, the checksum-offload mode, the hardware
//! VLAN offload slot, and per-packet metadata. The buffer body is
//! reference counted: [`Packet::clone`] shares it, and any editor
//! takes exclusive ownership of the bytes it is about to touch via
//! [`Packet::ensure_writable`]. A clone therefore never observes
//! mutations made through the original, or vice versa.

use super::checksum::Checksum;
use super::ether::ETHER_TYPE_IPV4;
use super::ether::ETHER_TYPE_IPV6;
use super::flow::FlowKey;
use super::ExecError;
use crate::api::TunnelInfo;
use crate::api::VlanTag;

cfg_if! {
    if #[cfg(all(not(feature = "std"), not(test)))] {
        use alloc::sync::Arc;
        use alloc::vec::Vec;
    } else {
        use std::sync::Arc;
        use std::vec::Vec;
    }
}

/// Headroom reserved in front of the data when a packet is built
/// from raw bytes, and again whenever the headroom is regrown. Push
/// operations need at most 4 bytes each; this covers several without
/// reallocating.
pub const DEF_HEADROOM: usize = 32;

/// The checksum-offload contract the packet arrived with.
///
/// `Complete` carries the running one's complement sum over the
/// packet data which the receive path computed; editors keep it in
/// step with their mutations. `Partial` means hardware will finish
/// the transport checksum before emission, so editors leave the
/// covered bytes alone and only maintain the stored pseudo-header
/// sum.
#[derive(Clone, Debug)]
pub enum CsumMode {
    None,
    Unnecessary,
    Complete(Checksum),
    Partial,
}

impl Default for CsumMode {
    fn default() -> Self {
        CsumMode::None
    }
}

/// A network packet.
#[derive(Clone, Debug)]
pub struct Packet {
    body: Arc<Vec<u8>>,
    // Offset of the first packet byte within `body`; everything in
    // front is headroom.
    data_off: usize,
    // Absolute offsets into `body`.
    mac_off: usize,
    net_off: usize,
    tp_off: usize,
    // Distance from the mac header to the first non-L2 header. In-
    // packet VLAN tags count; an MPLS label stack does not.
    mac_len: usize,
    // Outermost ethertype as the stack sees it.
    protocol: u16,
    // Set when an MPLS push buries the original protocol.
    inner_protocol: Option<u16>,
    csum: CsumMode,
    // Hardware VLAN offload slot.
    vlan: Option<VlanTag>,
    hash: Option<u32>,
    priority: u32,
    mark: u32,
    tunnel: Option<TunnelInfo>,
}

impl Packet {
    /// Create a packet holding a copy of `bytes`, with default
    /// headroom in front. All layer offsets start at the first byte;
    /// the classifier (or test scaffolding) adjusts them.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut body = Vec::with_capacity(DEF_HEADROOM + bytes.len());
        body.resize(DEF_HEADROOM, 0);
        body.extend_from_slice(bytes);

        Packet {
            body: Arc::new(body),
            data_off: DEF_HEADROOM,
            mac_off: DEF_HEADROOM,
            net_off: DEF_HEADROOM,
            tp_off: DEF_HEADROOM,
            mac_len: 0,
            protocol: 0,
            inner_protocol: None,
            csum: CsumMode::default(),
            vlan: None,
            hash: None,
            priority: 0,
            mark: 0,
            tunnel: None,
        }
    }

    /// Number of packet bytes.
    pub fn len(&self) -> usize {
        self.body.len() - self.data_off
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The packet bytes.
    pub fn data(&self) -> &[u8] {
        &self.body[self.data_off..]
    }

    /// The packet bytes, exclusively owned.
    ///
    /// Callers go through [`Packet::ensure_writable`] first so the
    /// copy-on-write point is explicit, but this is safe to call at
    /// any time.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let off = self.data_off;
        &mut Arc::make_mut(&mut self.body)[off..]
    }

    /// Whether the buffer body is currently shared with a clone.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.body) > 1
    }

    /// Ensure the first `len` bytes of data are present and
    /// exclusively owned, copying the body if it is shared.
    ///
    /// A request beyond the end of the packet fails the same way a
    /// failed header pull does.
    pub fn ensure_writable(&mut self, len: usize) -> Result<(), ExecError> {
        if len > self.len() {
            return Err(ExecError::OutOfMemory);
        }

        let _ = Arc::make_mut(&mut self.body);
        Ok(())
    }

    /// Grow the data region by `n` bytes at the front. The fresh
    /// bytes are uninitialized from the packet's point of view; the
    /// caller fills them. Reallocates when the headroom is spent.
    pub fn push_front(&mut self, n: usize) -> Result<(), ExecError> {
        if self.data_off >= n {
            let _ = Arc::make_mut(&mut self.body);
            self.data_off -= n;
            return Ok(());
        }

        let old_len = self.len();
        let mut new_body: Vec<u8> = Vec::new();
        new_body
            .try_reserve(DEF_HEADROOM + n + old_len)
            .map_err(|_| ExecError::OutOfMemory)?;
        new_body.resize(DEF_HEADROOM + n, 0);
        new_body.extend_from_slice(&self.body[self.data_off..]);

        // The data landed at DEF_HEADROOM + n; shift the layer
        // offsets to match.
        let shift = DEF_HEADROOM + n - self.data_off;
        self.mac_off += shift;
        self.net_off += shift;
        self.tp_off += shift;
        self.body = Arc::new(new_body);
        self.data_off = DEF_HEADROOM;
        Ok(())
    }

    /// Shrink the data region by `n` bytes at the front.
    pub fn pull_front(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.data_off += n;
    }

    /// Point the mac header at the current data start.
    pub fn reset_mac_header(&mut self) {
        self.mac_off = self.data_off;
    }

    /// Offset of the mac header relative to the data start.
    pub fn mac_offset(&self) -> usize {
        self.mac_off - self.data_off
    }

    pub fn mac_len(&self) -> usize {
        self.mac_len
    }

    pub fn set_mac_len(&mut self, len: usize) {
        self.mac_len = len;
    }

    /// Offset just past the L2 header, relative to the data start.
    ///
    /// For non-MPLS packets this is the network header. When an MPLS
    /// label stack is present it sits between this offset and the
    /// network header.
    pub fn mac_header_end(&self) -> usize {
        self.mac_offset() + self.mac_len
    }

    /// Offset of the network header relative to the data start.
    pub fn network_offset(&self) -> usize {
        self.net_off - self.data_off
    }

    pub fn set_network_offset(&mut self, off: usize) {
        self.net_off = self.data_off + off;
    }

    /// Offset of the transport header relative to the data start.
    pub fn transport_offset(&self) -> usize {
        self.tp_off - self.data_off
    }

    pub fn set_transport_offset(&mut self, off: usize) {
        self.tp_off = self.data_off + off;
    }

    /// The outermost ethertype as seen by the stack.
    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: u16) {
        self.protocol = protocol;
    }

    pub fn inner_protocol(&self) -> Option<u16> {
        self.inner_protocol
    }

    pub fn set_inner_protocol(&mut self, protocol: u16) {
        self.inner_protocol = Some(protocol);
    }

    pub fn csum_mode(&self) -> &CsumMode {
        &self.csum
    }

    pub fn csum_mode_mut(&mut self) -> &mut CsumMode {
        &mut self.csum
    }

    pub fn set_csum_mode(&mut self, mode: CsumMode) {
        self.csum = mode;
    }

    pub fn is_csum_partial(&self) -> bool {
        matches!(self.csum, CsumMode::Partial)
    }

    /// Fold freshly written bytes into a running receive sum.
    pub fn rcsum_add(&mut self, bytes: &[u8]) {
        if let CsumMode::Complete(csum) = &mut self.csum {
            csum.add(bytes);
        }
    }

    /// Remove departing bytes from a running receive sum.
    pub fn rcsum_sub(&mut self, bytes: &[u8]) {
        if let CsumMode::Complete(csum) = &mut self.csum {
            csum.sub(bytes);
        }
    }

    pub fn vlan_tag(&self) -> Option<VlanTag> {
        self.vlan
    }

    pub fn set_vlan_tag(&mut self, tag: Option<VlanTag>) {
        self.vlan = tag;
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    pub fn mark(&self) -> u32 {
        self.mark
    }

    pub fn set_mark(&mut self, mark: u32) {
        self.mark = mark;
    }

    pub fn tunnel(&self) -> Option<&TunnelInfo> {
        self.tunnel.as_ref()
    }

    pub fn set_tunnel(&mut self, tunnel: Option<TunnelInfo>) {
        self.tunnel = tunnel;
    }

    /// Drop the cached flow hash. Called by any editor which rewrites
    /// a field the hash covers.
    pub fn clear_hash(&mut self) {
        self.hash = None;
    }

    /// The packet's L4 flow hash, computed over the classifier's view
    /// of the addresses and ports and cached until a rewrite
    /// invalidates it.
    pub fn flow_hash(&mut self, key: &FlowKey) -> u32 {
        if let Some(hash) = self.hash {
            return hash;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&key.eth.ether_type.to_be_bytes());

        match key.eth.ether_type {
            ETHER_TYPE_IPV4 => {
                hasher.update(&key.ipv4.src.bytes());
                hasher.update(&key.ipv4.dst.bytes());
            }

            ETHER_TYPE_IPV6 => {
                hasher.update(&key.ipv6.src.bytes());
                hasher.update(&key.ipv6.dst.bytes());
                hasher.update(&key.ipv6.label.to_be_bytes());
            }

            _ => (),
        }

        hasher.update(&key.tp.src.to_be_bytes());
        hasher.update(&key.tp.dst.to_be_bytes());

        let hash = hasher.finalize();
        self.hash = Some(hash);
        hash
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clone_shares_until_write() {
        let mut pkt = Packet::from_slice(&[1, 2, 3, 4]);
        let clone = pkt.clone();
        assert!(pkt.is_shared());

        pkt.ensure_writable(4).unwrap();
        assert!(!pkt.is_shared());

        pkt.data_mut()[0] = 0xFF;
        assert_eq!(clone.data()[0], 1);
        assert_eq!(pkt.data()[0], 0xFF);
    }

    #[test]
    fn ensure_writable_rejects_overlong_range() {
        let mut pkt = Packet::from_slice(&[0; 8]);
        assert_eq!(pkt.ensure_writable(9), Err(ExecError::OutOfMemory));
        assert!(pkt.ensure_writable(8).is_ok());
    }

    #[test]
    fn push_pull_track_offsets() {
        let mut pkt = Packet::from_slice(&[0xAA; 20]);
        pkt.set_network_offset(14);
        pkt.push_front(4).unwrap();
        assert_eq!(pkt.len(), 24);
        // The old bytes kept their identity.
        assert_eq!(pkt.network_offset(), 18);
        pkt.pull_front(4);
        assert_eq!(pkt.len(), 20);
        assert_eq!(pkt.network_offset(), 14);
    }

    #[test]
    fn push_front_regrows_headroom() {
        let mut pkt = Packet::from_slice(&[0x55; 10]);
        pkt.set_network_offset(2);
        // Exhaust the initial headroom and force a reallocation.
        pkt.push_front(DEF_HEADROOM).unwrap();
        pkt.push_front(8).unwrap();
        assert_eq!(pkt.len(), 10 + DEF_HEADROOM + 8);
        assert_eq!(pkt.network_offset(), 2 + DEF_HEADROOM + 8);
        assert_eq!(pkt.data()[DEF_HEADROOM + 8], 0x55);
    }

    #[test]
    fn hash_cache_cleared() {
        let mut pkt = Packet::from_slice(&[0; 64]);
        let mut key = FlowKey::default();
        key.eth.ether_type = ETHER_TYPE_IPV4;
        key.tp.src = 80;

        let h1 = pkt.flow_hash(&key);
        key.tp.src = 8080;
        // Still cached.
        assert_eq!(pkt.flow_hash(&key), h1);
        pkt.clear_hash();
        assert_ne!(pkt.flow_hash(&key), h1);
    }
}
