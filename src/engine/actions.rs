// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! The action interpreter.
//!
//! [`execute_actions`] is the engine's only entry point. It walks
//! the flow's action list in order, dispatching to the header
//! editors and the host's ports. Two pieces of per-executor state
//! keep nesting under control:
//!
//! * a recursion counter bounding synchronous re-entry (a port that
//!   loops a packet straight back into the switch);
//!
//! * a deferred-action FIFO turning recirculation and sampling into
//!   iteration. Only the outermost entry drains it, so a long
//!   recirculation chain costs queue slots rather than stack frames.
//!
//! The FIFO's indices advance monotonically and reset only after a
//! full drain. The capacity therefore bounds the total number of
//! deferrals one top-level entry can generate, which is what stops a
//! flow that recirculates into itself: it runs out of slots and the
//! packet is dropped with a warning instead of cycling forever.

use super::ether;
use super::flow::jhash_1word;
use super::flow::FlowKey;
use super::ip4;
use super::ip6;
use super::mpls;
use super::packet::Packet;
use super::port::Dataplane;
use super::port::UpcallInfo;
use super::sctp;
use super::tcp;
use super::udp;
use super::vlan;
use super::ExecError;
use crate::api::Action;
use crate::api::ActionList;
use crate::api::SetAction;
use crate::api::UserspaceSpec;
use crate::ExecCtx;
use crate::LogLevel;
use core::cell::Cell;
use core::cell::RefCell;

/// Queue slots available to one top-level entry.
pub const DEFERRED_ACTION_FIFO_SIZE: usize = 10;

/// Nesting depth at which a packet is declared to be looping.
pub const EXEC_ACTIONS_LEVEL_LIMIT: u8 = 4;

/// Execution postponed until the current action list finishes.
///
/// With an action list attached this is a sampled sub-list to run;
/// without one it means "re-enter classification with this packet
/// and key".
struct DeferredAction {
    pkt: Packet,
    actions: Option<ActionList>,
    key: FlowKey,
}

/// The deferred-action queue.
///
/// `head` and `tail` only grow; [`ActionFifo::reset`] rearms the
/// queue once the outermost drain has emptied it.
struct ActionFifo {
    head: usize,
    tail: usize,
    slots: [Option<DeferredAction>; DEFERRED_ACTION_FIFO_SIZE],
}

impl ActionFifo {
    fn new() -> Self {
        Self {
            head: 0,
            tail: 0,
            slots: core::array::from_fn(|_| None),
        }
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn put(&mut self, da: DeferredAction) -> bool {
        if self.head >= DEFERRED_ACTION_FIFO_SIZE {
            return false;
        }

        self.slots[self.head] = Some(da);
        self.head += 1;
        true
    }

    fn get(&mut self) -> Option<DeferredAction> {
        if self.is_empty() {
            return None;
        }

        self.tail += 1;
        self.slots[self.tail - 1].take()
    }

    fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

/// Throttle for warnings emitted from the per-packet path: the first
/// few pass, then one in every `every`.
pub struct RateLimit {
    hits: Cell<u32>,
    burst: u32,
    every: u32,
}

impl RateLimit {
    pub fn new(burst: u32, every: u32) -> Self {
        Self { hits: Cell::new(0), burst, every }
    }

    pub fn allow(&self) -> bool {
        let hits = self.hits.get();
        self.hits.set(hits.wrapping_add(1));
        hits < self.burst || hits % self.every == 0
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(5, 100)
    }
}

/// Per-executor engine state.
///
/// One of these exists per executor thread, created by the host and
/// handed to every [`execute_actions`] call made on that thread. The
/// type is deliberately not `Sync`: the single-writer discipline the
/// engine relies on is enforced by the compiler rather than by
/// convention.
pub struct CpuCtx {
    level: Cell<u8>,
    fifo: RefCell<ActionFifo>,
    ectx: ExecCtx,
    warn_limit: RateLimit,
}

impl CpuCtx {
    pub fn new(ectx: ExecCtx) -> Self {
        Self {
            level: Cell::new(0),
            fifo: RefCell::new(ActionFifo::new()),
            ectx,
            warn_limit: RateLimit::default(),
        }
    }

    /// Current nesting depth.
    pub fn level(&self) -> u8 {
        self.level.get()
    }

    fn rand_u32(&self) -> u32 {
        self.ectx.rand.next_u32()
    }

    fn warn(&self, msg: &str) {
        if self.warn_limit.allow() {
            self.ectx.log.log(LogLevel::Warn, msg);
        }
    }
}

/// Queue a deferred execution. Returns false when no slot was free,
/// in which case the packet has been dropped.
fn add_deferred_actions(
    ctx: &CpuCtx,
    pkt: Packet,
    key: FlowKey,
    actions: Option<ActionList>,
) -> bool {
    ctx.fifo.borrow_mut().put(DeferredAction { pkt, actions, key })
}

fn do_output(dp: &dyn Dataplane, pkt: Packet, port: u32) {
    match dp.vport(port) {
        Some(vport) => vport.send(pkt),
        None => drop(pkt),
    }
}

fn output_userspace(
    dp: &dyn Dataplane,
    pkt: &Packet,
    key: &FlowKey,
    spec: &UserspaceSpec,
) -> Result<(), ExecError> {
    let egress_tun_info = spec.egress_tun_port.and_then(|port| {
        dp.vport(port).and_then(|vport| vport.egress_tunnel_info(pkt).ok())
    });

    let info = UpcallInfo {
        userdata: spec.userdata.as_deref(),
        pid: spec.pid,
        egress_tun_info,
    };

    dp.upcall(pkt, key, &info)
}

fn execute_hash(pkt: &mut Packet, key: &mut FlowKey, basis: u32) {
    let mut hash = pkt.flow_hash(key);
    hash = jhash_1word(hash, basis);
    if hash == 0 {
        hash = 0x1;
    }

    key.flow_hash = hash;
}

fn execute_set_action(
    pkt: &mut Packet,
    key: &mut FlowKey,
    action: &SetAction,
) -> Result<(), ExecError> {
    match action {
        SetAction::Priority(priority) => {
            pkt.set_priority(*priority);
            key.phy.priority = *priority;
            Ok(())
        }

        SetAction::Mark(mark) => {
            pkt.set_mark(*mark);
            key.phy.mark = *mark;
            Ok(())
        }

        SetAction::Tunnel(info) => {
            pkt.set_tunnel(Some(info.clone()));
            Ok(())
        }

        SetAction::Ethernet { src, dst } => {
            ether::set_eth_addr(pkt, key, *src, *dst)
        }

        SetAction::Ipv4(spec) => ip4::set_ipv4(pkt, key, spec),
        SetAction::Ipv6(spec) => ip6::set_ipv6(pkt, key, spec),
        SetAction::Tcp { src, dst } => tcp::set_tcp(pkt, key, *src, *dst),
        SetAction::Udp { src, dst } => udp::set_udp(pkt, key, *src, *dst),
        SetAction::Sctp { src, dst } => sctp::set_sctp(pkt, key, *src, *dst),
        SetAction::Mpls { lse } => mpls::set_mpls(pkt, key, *lse),
    }
}

/// Run a sample action against the live packet.
///
/// The common deployment is a single userspace action inside the
/// sample; that case skips the clone because the upcall transport
/// copies internally. Everything else is cloned and deferred, and
/// trouble on that path (no queue slot) drops the sample rather than
/// the packet.
fn sample(
    dp: &dyn Dataplane,
    ctx: &CpuCtx,
    pkt: &Packet,
    key: &FlowKey,
    probability: u32,
    nested: &ActionList,
) -> Result<(), ExecError> {
    if ctx.rand_u32() >= probability {
        return Ok(());
    }

    if nested.is_empty() {
        return Ok(());
    }

    if let [Action::Userspace(spec)] = nested.as_slice() {
        return output_userspace(dp, pkt, key, spec);
    }

    let clone = pkt.clone();
    if !add_deferred_actions(ctx, clone, key.clone(), Some(nested.clone())) {
        ctx.warn(&format!(
            "{}: deferred actions limit reached, dropping sample action",
            dp.name()
        ));
    }

    Ok(())
}

/// Queue the packet for recirculation.
///
/// Returns the packet when the caller should keep walking the list
/// (the action was not last, so a clone was queued instead), `None`
/// when the packet has been consumed.
fn execute_recirc(
    dp: &dyn Dataplane,
    ctx: &CpuCtx,
    pkt: Packet,
    key: &mut FlowKey,
    recirc_id: u32,
    last: bool,
) -> Result<Option<Packet>, ExecError> {
    if !key.is_valid() {
        dp.flow_key_update(&pkt, key)?;
    }
    debug_assert!(key.is_valid());

    let (queued, keep) = if last {
        (pkt, None)
    } else {
        // The original continues down the list; its clone takes the
        // trip through the classifier.
        let clone = pkt.clone();
        (clone, Some(pkt))
    };

    let mut pkt_key = key.clone();
    pkt_key.recirc_id = recirc_id;

    if !add_deferred_actions(ctx, queued, pkt_key, None) {
        ctx.warn(&format!(
            "{}: deferred action limit reached, drop recirc action",
            dp.name()
        ));
    }

    Ok(keep)
}

/// Execute a list of actions against `pkt`.
fn do_execute_actions(
    dp: &dyn Dataplane,
    ctx: &CpuCtx,
    mut pkt: Packet,
    key: &mut FlowKey,
    actions: &[Action],
) -> Result<(), ExecError> {
    // Every output action needs a separate clone of the packet, but
    // the common case is just a single output action at the end of
    // the list. Holding the port id until the next iteration lets
    // that case send the original and skip the clone entirely.
    let mut prev_port: Option<u32> = None;
    let last_idx = actions.len().checked_sub(1);

    for (idx, action) in actions.iter().enumerate() {
        let last = Some(idx) == last_idx;

        if let Some(port) = prev_port.take() {
            do_output(dp, pkt.clone(), port);
        }

        let res = match action {
            Action::Output(port) => {
                prev_port = Some(*port);
                Ok(())
            }

            Action::Userspace(spec) => output_userspace(dp, &pkt, key, spec),

            Action::Hash { basis } => {
                execute_hash(&mut pkt, key, *basis);
                Ok(())
            }

            Action::PushMpls { lse, ethertype } => {
                mpls::push_mpls(&mut pkt, key, *lse, *ethertype)
            }

            Action::PopMpls { ethertype } => {
                mpls::pop_mpls(&mut pkt, key, *ethertype)
            }

            Action::PushVlan(tag) => vlan::push_vlan(&mut pkt, key, *tag),

            Action::PopVlan => vlan::pop_vlan(&mut pkt, key),

            Action::Recirc(recirc_id) => {
                match execute_recirc(dp, ctx, pkt, key, *recirc_id, last)? {
                    Some(keep) => {
                        pkt = keep;
                        Ok(())
                    }

                    // Last action: the packet now belongs to the
                    // deferred queue (or was dropped with it full).
                    None => return Ok(()),
                }
            }

            Action::Set(set) => execute_set_action(&mut pkt, key, set),

            Action::Sample { probability, actions } => {
                sample(dp, ctx, &pkt, key, *probability, actions)
            }
        };

        // An editor failure consumes the packet and aborts the list.
        res?;
    }

    match prev_port {
        Some(port) => do_output(dp, pkt, port),
        None => drop(pkt),
    }

    Ok(())
}

/// Run everything the deferred queue holds, in order, including
/// entries queued while draining. Errors here have nowhere to go and
/// are dropped with their packets.
fn process_deferred_actions(dp: &dyn Dataplane, ctx: &CpuCtx) {
    loop {
        let da = ctx.fifo.borrow_mut().get();
        let Some(DeferredAction { pkt, actions, mut key }) = da else {
            break;
        };

        match actions {
            Some(acts) => {
                let _ = do_execute_actions(dp, ctx, pkt, &mut key, &acts);
            }

            None => dp.classify_and_process(ctx, pkt, key),
        }
    }

    ctx.fifo.borrow_mut().reset();
}

/// Execute a flow's action list against `pkt`.
///
/// The packet is consumed on every path: emitted, delivered,
/// deferred, or dropped. The result reflects only this entry's
/// walk; failures during deferred execution are not reported.
pub fn execute_actions(
    dp: &dyn Dataplane,
    ctx: &CpuCtx,
    pkt: Packet,
    key: &mut FlowKey,
    actions: &ActionList,
) -> Result<(), ExecError> {
    let level = ctx.level.get();
    if level >= EXEC_ACTIONS_LEVEL_LIMIT {
        ctx.warn(&format!("{}: packet loop detected, dropping", dp.name()));
        drop(pkt);
        return Err(ExecError::Loop);
    }

    ctx.level.set(level + 1);
    let res = do_execute_actions(dp, ctx, pkt, key, actions);

    if level == 0 {
        process_deferred_actions(dp, ctx);
    }

    ctx.level.set(level);
    res
}

#[cfg(test)]
mod test {
    use super::*;

    fn da(tag: u32) -> DeferredAction {
        let mut key = FlowKey::default();
        key.recirc_id = tag;
        DeferredAction {
            pkt: Packet::from_slice(&[0u8; 4]),
            actions: None,
            key,
        }
    }

    #[test]
    fn fifo_orders_and_caps() {
        let mut fifo = ActionFifo::new();
        assert!(fifo.is_empty());

        for i in 0..DEFERRED_ACTION_FIFO_SIZE {
            assert!(fifo.put(da(i as u32)));
        }
        assert!(!fifo.put(da(99)));

        for i in 0..DEFERRED_ACTION_FIFO_SIZE {
            assert_eq!(fifo.get().unwrap().key.recirc_id, i as u32);
        }
        assert!(fifo.get().is_none());

        // Spent until reset: the indices only move forward.
        assert!(!fifo.put(da(100)));
        fifo.reset();
        assert!(fifo.put(da(100)));
    }

    #[test]
    fn fifo_interleaved_drain_is_bounded() {
        let mut fifo = ActionFifo::new();
        assert!(fifo.put(da(0)));

        // A self-recirculating flow: each dequeue enqueues another.
        let mut processed = 0;
        while let Some(entry) = fifo.get() {
            processed += 1;
            let _ = fifo.put(entry);
        }

        assert_eq!(processed, DEFERRED_ACTION_FIFO_SIZE);
    }

    #[test]
    fn rate_limit_burst_then_sparse() {
        let limit = RateLimit::new(2, 10);
        assert!(limit.allow());
        assert!(limit.allow());
        assert!(!limit.allow());

        let mut allowed = 0;
        for _ in 0..20 {
            if limit.allow() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 2);
    }
}
