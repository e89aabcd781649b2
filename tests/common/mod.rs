// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! Test scaffolding: a mock dataplane with recording ports and a
//! reference flow-key extractor standing in for the classifier.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use swact::api::ActionList;
use swact::api::TunnelInfo;
use swact::engine::actions::execute_actions;
use swact::engine::actions::CpuCtx;
use swact::engine::ether::ETHER_HDR_SZ;
use swact::engine::ether::ETHER_TYPE_IPV4;
use swact::engine::ether::ETHER_TYPE_IPV6;
use swact::engine::ether::ETHER_TYPE_MPLS;
use swact::engine::ether::ETHER_TYPE_MPLS_MCAST;
use swact::engine::ether::ETHER_TYPE_VLAN;
use swact::engine::flow::FlowKey;
use swact::engine::packet::Packet;
use swact::engine::port::Dataplane;
use swact::engine::port::UpcallInfo;
use swact::engine::port::Vport;
use swact::engine::ExecError;
use swact::ExecCtx;
use swact::LogLevel;
use swact::LogProvider;
use swact::RandProvider;

/// Collects engine log output for assertions.
pub struct RecordingLog {
    msgs: Rc<RefCell<Vec<String>>>,
}

impl LogProvider for RecordingLog {
    fn log(&self, _level: LogLevel, msg: &str) {
        self.msgs.borrow_mut().push(msg.to_string());
    }
}

/// A randomness source that always yields the same value, so sample
/// probabilities are decided by the test.
pub struct FixedRand(pub u32);

impl RandProvider for FixedRand {
    fn next_u32(&self) -> u32 {
        self.0
    }
}

/// Build a per-executor context plus a handle on its log output.
pub fn test_ctx(rand: u32) -> (Rc<CpuCtx>, Rc<RefCell<Vec<String>>>) {
    let msgs = Rc::new(RefCell::new(Vec::new()));
    let ectx = ExecCtx {
        log: Box::new(RecordingLog { msgs: msgs.clone() }),
        rand: Box::new(FixedRand(rand)),
    };
    (Rc::new(CpuCtx::new(ectx)), msgs)
}

/// A recording virtual port.
pub struct RecordingVport {
    pub sent: Rc<RefCell<Vec<Packet>>>,
    pub tunnel: Option<TunnelInfo>,
}

impl Vport for RecordingVport {
    fn send(&self, pkt: Packet) {
        self.sent.borrow_mut().push(pkt);
    }

    fn egress_tunnel_info(
        &self,
        _pkt: &Packet,
    ) -> Result<TunnelInfo, ExecError> {
        self.tunnel.clone().ok_or(ExecError::Inval)
    }
}

/// One recorded userspace delivery.
pub struct UpcallRecord {
    pub pid: u32,
    pub userdata: Option<Vec<u8>>,
    pub egress_tun_info: Option<TunnelInfo>,
    pub bytes: Vec<u8>,
}

/// The mock switch: recording ports, a recirculation flow table,
/// and optional upcall re-entry for loop tests.
#[derive(Default)]
pub struct MockSwitch {
    pub vports: HashMap<u32, Box<dyn Vport>>,
    pub upcalls: RefCell<Vec<UpcallRecord>>,
    pub flows: HashMap<u32, ActionList>,
    pub classify_count: Cell<u32>,
    pub upcall_err: Option<ExecError>,
    /// When set, every upcall synchronously re-enters the engine
    /// with this list, imitating a host path that feeds the packet
    /// straight back into the switch.
    pub reenter_on_upcall: RefCell<Option<(Rc<CpuCtx>, ActionList)>>,
}

impl MockSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recording vport, returning the handle its deliveries
    /// land in.
    pub fn add_vport(&mut self, port: u32) -> Rc<RefCell<Vec<Packet>>> {
        let sent = Rc::new(RefCell::new(Vec::new()));
        self.vports.insert(
            port,
            Box::new(RecordingVport { sent: sent.clone(), tunnel: None }),
        );
        sent
    }

    pub fn add_tunnel_vport(
        &mut self,
        port: u32,
        tunnel: TunnelInfo,
    ) -> Rc<RefCell<Vec<Packet>>> {
        let sent = Rc::new(RefCell::new(Vec::new()));
        self.vports.insert(
            port,
            Box::new(RecordingVport { sent: sent.clone(), tunnel: Some(tunnel) }),
        );
        sent
    }
}

impl Dataplane for MockSwitch {
    fn name(&self) -> &str {
        "dp-test"
    }

    fn vport(&self, port: u32) -> Option<&dyn Vport> {
        self.vports.get(&port).map(|v| v.as_ref())
    }

    fn upcall(
        &self,
        pkt: &Packet,
        key: &FlowKey,
        info: &UpcallInfo<'_>,
    ) -> Result<(), ExecError> {
        self.upcalls.borrow_mut().push(UpcallRecord {
            pid: info.pid,
            userdata: info.userdata.map(|u| u.to_vec()),
            egress_tun_info: info.egress_tun_info.clone(),
            bytes: pkt.data().to_vec(),
        });

        if let Some(err) = self.upcall_err {
            return Err(err);
        }

        let reenter = self
            .reenter_on_upcall
            .borrow()
            .as_ref()
            .map(|(ctx, acts)| (ctx.clone(), acts.clone()));
        if let Some((ctx, acts)) = reenter {
            let mut key = key.clone();
            return execute_actions(self, &ctx, pkt.clone(), &mut key, &acts);
        }

        Ok(())
    }

    fn classify_and_process(&self, ctx: &CpuCtx, pkt: Packet, mut key: FlowKey) {
        self.classify_count.set(self.classify_count.get() + 1);

        match self.flows.get(&key.recirc_id) {
            Some(acts) => {
                let acts = acts.clone();
                let _ = execute_actions(self, ctx, pkt, &mut key, &acts);
            }

            None => drop(pkt),
        }
    }

    fn flow_key_update(
        &self,
        pkt: &Packet,
        key: &mut FlowKey,
    ) -> Result<(), ExecError> {
        flow_key_extract(pkt, key);
        Ok(())
    }
}

/// A reference flow-key extractor covering what the tests exercise:
/// plain Ethernet, VLAN tags (offloaded or in-packet), MPLS, IPv4,
/// IPv6, and the TCP/UDP/SCTP port pair.
pub fn flow_key_extract(pkt: &Packet, key: &mut FlowKey) {
    let d = pkt.data();
    *key = FlowKey {
        recirc_id: key.recirc_id,
        flow_hash: key.flow_hash,
        phy: key.phy,
        ..FlowKey::default()
    };

    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&d[0..6]);
    src.copy_from_slice(&d[6..12]);
    key.eth.dst = dst.into();
    key.eth.src = src.into();

    if let Some(tag) = pkt.vlan_tag() {
        key.eth.tci = tag.tci;
    }

    let mut off = 12;
    let mut ether_type = u16::from_be_bytes([d[off], d[off + 1]]);
    while ether_type == ETHER_TYPE_VLAN && d.len() >= off + 6 {
        key.eth.tci = u16::from_be_bytes([d[off + 2], d[off + 3]]);
        off += 4;
        ether_type = u16::from_be_bytes([d[off], d[off + 1]]);
    }
    key.eth.ether_type = ether_type;
    off += 2;

    match ether_type {
        ETHER_TYPE_MPLS | ETHER_TYPE_MPLS_MCAST => {
            key.mpls.top_lse = u32::from_be_bytes([
                d[off],
                d[off + 1],
                d[off + 2],
                d[off + 3],
            ]);
        }

        ETHER_TYPE_IPV4 => {
            let ip = off;
            key.ip.tos = d[ip + 1];
            key.ip.ttl = d[ip + 8];
            let mut addr = [0u8; 4];
            addr.copy_from_slice(&d[ip + 12..ip + 16]);
            key.ipv4.src = addr.into();
            addr.copy_from_slice(&d[ip + 16..ip + 20]);
            key.ipv4.dst = addr.into();

            let ihl = ((d[ip] & 0x0F) as usize) * 4;
            extract_ports(key, d, d[ip + 9], ip + ihl);
        }

        ETHER_TYPE_IPV6 => {
            let ip = off;
            key.ip.tos = (u16::from_be_bytes([d[ip], d[ip + 1]]) >> 4) as u8;
            key.ip.ttl = d[ip + 7];
            key.ipv6.label = u32::from_be_bytes([
                d[ip],
                d[ip + 1],
                d[ip + 2],
                d[ip + 3],
            ]) & 0x000F_FFFF;
            let mut addr = [0u8; 16];
            addr.copy_from_slice(&d[ip + 8..ip + 24]);
            key.ipv6.src = addr.into();
            addr.copy_from_slice(&d[ip + 24..ip + 40]);
            key.ipv6.dst = addr.into();

            extract_ports(key, d, d[ip + 6], ip + 40);
        }

        _ => (),
    }
}

fn extract_ports(key: &mut FlowKey, d: &[u8], proto: u8, tp: usize) {
    // TCP, UDP, SCTP all lead with the port pair.
    if matches!(proto, 6 | 17 | 132) && d.len() >= tp + 4 {
        key.tp.src = u16::from_be_bytes([d[tp], d[tp + 1]]);
        key.tp.dst = u16::from_be_bytes([d[tp + 2], d[tp + 3]]);
    }
}

/// Initialize a packet's layer offsets the way the classifier would
/// have, assuming no in-packet VLAN tags.
pub fn classify(bytes: &[u8]) -> (Packet, FlowKey) {
    let mut pkt = Packet::from_slice(bytes);
    pkt.set_mac_len(ETHER_HDR_SZ);
    let ether_type = u16::from_be_bytes([bytes[12], bytes[13]]);
    pkt.set_protocol(ether_type);
    pkt.set_network_offset(ETHER_HDR_SZ);

    match ether_type {
        ETHER_TYPE_IPV4 => {
            let ihl = ((bytes[ETHER_HDR_SZ] & 0x0F) as usize) * 4;
            pkt.set_transport_offset(ETHER_HDR_SZ + ihl);
        }

        ETHER_TYPE_IPV6 => {
            pkt.set_transport_offset(ETHER_HDR_SZ + 40);
        }

        _ => {
            pkt.set_transport_offset(ETHER_HDR_SZ);
        }
    }

    let mut key = FlowKey::default();
    flow_key_extract(&pkt, &mut key);
    (pkt, key)
}

// ================================================================
// Frame builders
// ================================================================

use swact::engine::checksum::Checksum;
use swact::engine::checksum::HeaderChecksum;

pub const HOST_MAC: [u8; 6] = [0x02, 0x08, 0x20, 0xd8, 0x35, 0xcf];
pub const GW_MAC: [u8; 6] = [0x02, 0x08, 0x20, 0x00, 0x00, 0x01];

/// A minimal Ethernet frame with an opaque payload.
pub fn eth_frame(payload_len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; ETHER_HDR_SZ + payload_len];
    bytes[0..6].copy_from_slice(&GW_MAC);
    bytes[6..12].copy_from_slice(&HOST_MAC);
    // An ethertype the engine has no interest in.
    bytes[12..14].copy_from_slice(&0x88B5u16.to_be_bytes());
    for (i, b) in bytes[ETHER_HDR_SZ..].iter_mut().enumerate() {
        *b = i as u8;
    }
    bytes
}

/// An IPv4/TCP frame with correct IPv4 and TCP checksums.
pub fn ipv4_tcp_frame(
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let ip_len = 20 + 20 + payload.len();
    let mut bytes = vec![0u8; ETHER_HDR_SZ + ip_len];
    bytes[0..6].copy_from_slice(&GW_MAC);
    bytes[6..12].copy_from_slice(&HOST_MAC);
    bytes[12..14].copy_from_slice(&ETHER_TYPE_IPV4.to_be_bytes());

    let ip = ETHER_HDR_SZ;
    bytes[ip] = 0x45;
    bytes[ip + 2..ip + 4].copy_from_slice(&(ip_len as u16).to_be_bytes());
    bytes[ip + 6] = 0x40; // don't fragment
    bytes[ip + 8] = 64;
    bytes[ip + 9] = 6;
    bytes[ip + 12..ip + 16].copy_from_slice(&src_ip);
    bytes[ip + 16..ip + 20].copy_from_slice(&dst_ip);
    let csum = HeaderChecksum::from(Checksum::compute(&bytes[ip..ip + 20]));
    bytes[ip + 10..ip + 12].copy_from_slice(&csum.bytes());

    let tcp = ip + 20;
    bytes[tcp..tcp + 2].copy_from_slice(&src_port.to_be_bytes());
    bytes[tcp + 2..tcp + 4].copy_from_slice(&dst_port.to_be_bytes());
    bytes[tcp + 4..tcp + 8].copy_from_slice(&1u32.to_be_bytes());
    bytes[tcp + 12] = 5 << 4;
    bytes[tcp + 13] = 0x18; // psh|ack
    bytes[tcp + 14..tcp + 16].copy_from_slice(&0xFFFFu16.to_be_bytes());
    bytes[tcp + 20..].copy_from_slice(payload);

    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src_ip);
    pseudo[4..8].copy_from_slice(&dst_ip);
    pseudo[9] = 6;
    pseudo[10..12]
        .copy_from_slice(&((20 + payload.len()) as u16).to_be_bytes());
    let mut csum = Checksum::compute(&pseudo);
    csum.add(&bytes[tcp..]);
    let check = HeaderChecksum::from(csum).bytes();
    bytes[tcp + 16..tcp + 18].copy_from_slice(&check);

    bytes
}

/// Pull the IPv4 addresses out of a frame for checksum verification.
pub fn ipv4_addrs(bytes: &[u8]) -> ([u8; 4], [u8; 4]) {
    let ip = ETHER_HDR_SZ;
    let mut src = [0u8; 4];
    let mut dst = [0u8; 4];
    src.copy_from_slice(&bytes[ip + 12..ip + 16]);
    dst.copy_from_slice(&bytes[ip + 16..ip + 20]);
    (src, dst)
}
