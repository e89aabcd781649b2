// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! The seams between the engine and its host.
//!
//! The engine mutates and routes packets; everything else --
//! classification, flow tables, port I/O, the userspace channel --
//! belongs to the host and is reached through the traits here. The
//! host guarantees the handles stay alive across one engine entry
//! (its read-side critical section).

use super::actions::CpuCtx;
use super::flow::FlowKey;
use super::packet::Packet;
use super::ExecError;
use crate::api::TunnelInfo;

/// A virtual port: the egress endpoint a packet leaves through.
pub trait Vport {
    /// Transmit the packet. The port owns it from here on.
    fn send(&self, pkt: Packet);

    /// Describe the tunnel this port would encapsulate the packet
    /// into, for upcalls that want egress tunnel metadata.
    fn egress_tunnel_info(&self, pkt: &Packet) -> Result<TunnelInfo, ExecError>;
}

/// The datapath the engine executes on behalf of.
pub trait Dataplane {
    /// The datapath's name, used in log messages.
    fn name(&self) -> &str;

    /// Look up a virtual port by id.
    fn vport(&self, port: u32) -> Option<&dyn Vport>;

    /// Deliver a packet to a userspace listener. The packet is
    /// borrowed; the transport clones what it needs.
    fn upcall(
        &self,
        pkt: &Packet,
        key: &FlowKey,
        info: &UpcallInfo<'_>,
    ) -> Result<(), ExecError>;

    /// Re-enter classification with a recirculated packet. The
    /// engine's per-executor context is threaded through so a
    /// matched flow's actions can be executed on the same context.
    fn classify_and_process(&self, ctx: &CpuCtx, pkt: Packet, key: FlowKey);

    /// Re-extract the flow key from the packet headers.
    fn flow_key_update(
        &self,
        pkt: &Packet,
        key: &mut FlowKey,
    ) -> Result<(), ExecError>;
}

/// Everything a userspace delivery carries besides the packet.
#[derive(Clone, Debug)]
pub struct UpcallInfo<'a> {
    /// Opaque bytes from the triggering action.
    pub userdata: Option<&'a [u8]>,

    /// The destination listener.
    pub pid: u32,

    /// Egress tunnel metadata, when the action asked for it and the
    /// port could provide it.
    pub egress_tun_info: Option<TunnelInfo>,
}
