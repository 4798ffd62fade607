//! Per-frame egress admission: classify, pick the hardware transmit
//! window, spend shaper credit and stamp the metadata header.

use std::io;

use log::debug;
use pnet::packet::{
    ethernet::{EtherType, EthernetPacket},
    vlan::VlanPacket,
    Packet,
};

use crate::{
    clock::PtpClock,
    constants::{
        BE_QUEUE_SIZE, DEFAULT_TO_MARGIN_NS, ETH_TYPE_PTPV2, H2C_LATENCY_NS, MAX_QBV_SLOTS,
        TC_COUNT, TC_QOPT_MAX_QUEUE, TSN_PRIO_COUNT, TSN_QUEUE_SIZE,
    },
    csr::{DeviceAdaptor, TxCounters},
    error::{Result, TsnError},
    mem::TxFrame,
    metadata::{FailPolicy, TickCount, TimestampId, TxMetadata},
    qav::{bytes_to_ns, QavState},
    qbv::{bake, validate_slots, QbvBakedConfig, QbvConfig, QbvSlot},
    tracker::BufferTracker,
    types::Timestamp,
};

/// Hardware priority queue a frame is steered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum TsnPrio {
    Gptp = 3,
    Vlan = 5,
    BestEffort = 7,
}

/// The four gate edges of one frame, in wall-time nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timestamps {
    pub(crate) from: Timestamp,
    pub(crate) to: Timestamp,
    pub(crate) delay_from: Timestamp,
    pub(crate) delay_to: Timestamp,
}

/// `to` value meaning "no closing edge", for both timestamps and
/// sysclocks.
pub(crate) fn always_open(from: u64) -> u64 {
    from.wrapping_sub(1)
}

/// mqprio-style priority to traffic class mapping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MqprioConfig {
    num_tc: u8,
    prio_tc_map: [u8; TC_QOPT_MAX_QUEUE],
}

impl Default for MqprioConfig {
    fn default() -> Self {
        Self {
            num_tc: 0,
            prio_tc_map: [0; TC_QOPT_MAX_QUEUE],
        }
    }
}

impl MqprioConfig {
    /// Identity when no traffic classes are configured.
    fn tc_of(&self, prio: u8) -> u8 {
        if self.num_tc == 0 {
            return prio;
        }
        #[allow(clippy::indexing_slicing)]
        self.prio_tc_map[usize::from(prio) % TC_QOPT_MAX_QUEUE]
    }
}

/// An mqprio configuration update.
#[derive(Debug, Clone, Copy)]
pub struct MqprioUpdate {
    pub num_tc: u8,
    pub queue_count: [u8; TC_QOPT_MAX_QUEUE],
    pub queue_offset: [u8; TC_QOPT_MAX_QUEUE],
    pub prio_tc_map: [u8; TC_QOPT_MAX_QUEUE],
}

/// A credit-based shaper update, in the offload's units: credits are
/// scaled up by 1000, slopes down by 1000.
#[derive(Debug, Clone, Copy)]
pub struct QavParams {
    pub enable: bool,
    pub idle_slope: i32,
    pub send_slope: i32,
    pub hi_credit: i32,
    pub lo_credit: i32,
}

/// One entry of a gate schedule update.
#[derive(Debug, Clone, Copy)]
pub struct QbvEntry {
    pub gate_mask: u8,
    pub interval_ns: u32,
}

/// The egress scheduler: canonical Qbv/Qav configuration, the compiled
/// gate schedule, the FIFO occupancy mirror and the per-priority
/// ordering cursors.
#[derive(Debug)]
pub(crate) struct TsnEngine<Dev> {
    qbv: QbvConfig,
    qbv_baked: QbvBakedConfig,
    qav: [QavState; TC_COUNT],
    mqprio: MqprioConfig,
    tracker: BufferTracker,
    counters: TxCounters<Dev>,
    queue_available_at: [Timestamp; TSN_PRIO_COUNT],
    total_available_at: Timestamp,
    /// Whether hardware TX timestamping is on.
    tx_tstamp_on: bool,
}

impl<Dev: DeviceAdaptor> TsnEngine<Dev> {
    pub(crate) fn new(dev: Dev, tx_tstamp_on: bool) -> Self {
        let mut engine = Self {
            qbv: QbvConfig::default(),
            qbv_baked: QbvBakedConfig::default(),
            qav: [QavState::default(); TC_COUNT],
            mqprio: MqprioConfig::default(),
            tracker: BufferTracker::default(),
            counters: TxCounters::new(dev),
            queue_available_at: [0; TSN_PRIO_COUNT],
            total_available_at: 0,
            tx_tstamp_on,
        };
        engine.rebake();
        engine
    }

    fn rebake(&mut self) {
        self.qbv_baked = bake(&mut self.qbv, &self.qav);
    }

    pub(crate) fn total_available_at(&self) -> Timestamp {
        self.total_available_at
    }

    pub(crate) fn pending_packets(&self) -> u64 {
        self.tracker.pending()
    }

    /// Fills in the time related metadata of a frame.
    ///
    /// Returns `Ok(false)` when the frame is refused; a refused call
    /// leaves no trace in the scheduler state.
    pub(crate) fn fill_metadata(
        &mut self,
        clock: &PtpClock<Dev>,
        now: Timestamp,
        frame: &mut TxFrame<'_>,
    ) -> io::Result<bool> {
        self.tracker.refresh(&mut self.counters)?;

        let Some(stub) = frame.metadata() else {
            return Ok(false);
        };
        let frame_length = stub.frame_length;

        let vlan_prio = vlan_pcp(frame.data());
        let tc_id = usize::from(self.mqprio.tc_of(vlan_prio)).min(TC_COUNT - 1);
        let gptp = is_gptp(frame.data());

        let queue_prio = if gptp {
            TsnPrio::Gptp
        } else if vlan_prio > 0 {
            TsnPrio::Vlan
        } else {
            TsnPrio::BestEffort
        };
        let consider_delay = queue_prio != TsnPrio::BestEffort;

        let mut from = now + H2C_LATENCY_NS;
        let duration_ns = bytes_to_ns(u64::from(frame_length));

        #[allow(clippy::indexing_slicing)]
        let qav_enabled = self.qav[tc_id].enabled;

        let (timestamps, fail_policy) = if !self.qbv.enabled && !qav_enabled {
            // nothing constrains this frame, keep per-queue ordering only
            let start = self.total_available_at;
            (
                Timestamps {
                    from: start,
                    to: start + DEFAULT_TO_MARGIN_NS,
                    delay_from: start,
                    delay_to: start + DEFAULT_TO_MARGIN_NS,
                },
                FailPolicy::Drop,
            )
        } else {
            #[allow(clippy::indexing_slicing)]
            if qav_enabled && self.qav[tc_id].available_at > from {
                from = self.qav[tc_id].available_at;
            }
            if consider_delay {
                if self.tracker.pending() >= TSN_QUEUE_SIZE {
                    return Ok(false);
                }
            } else {
                if self.tracker.pending() >= BE_QUEUE_SIZE {
                    return Ok(false);
                }
                from = from.max(self.total_available_at);
            }

            let Some(timestamps) = get_timestamps(
                &self.qbv,
                &self.qbv_baked,
                from,
                tc_id,
                u64::from(frame_length),
                consider_delay,
            ) else {
                // the gate never opens for this class
                debug!("gate permanently closed for tc {tc_id}");
                return Ok(false);
            };
            let fail_policy = if consider_delay {
                FailPolicy::Retry
            } else {
                FailPolicy::Drop
            };
            (timestamps, fail_policy)
        };

        // last refusal gate; claiming the slot before mutating keeps a
        // refused call free of side effects
        if !self.tracker.append() {
            return Ok(false);
        }

        let prio = queue_prio as u8;
        let from_sysclock = clock.gate_sysclock(timestamps.from);
        let to = if timestamps.to == always_open(timestamps.from) {
            TickCount::from_sysclock(always_open(from_sysclock), prio)
        } else {
            TickCount::from_sysclock(clock.gate_sysclock(timestamps.to), prio)
        };
        let timestamp_id = if !self.tx_tstamp_on {
            TimestampId::None
        } else if gptp {
            TimestampId::Gptp
        } else {
            TimestampId::Normal
        };
        frame.set_metadata(&TxMetadata {
            from: TickCount::from_sysclock(from_sysclock, prio),
            to,
            delay_from: TickCount::from_sysclock(clock.gate_sysclock(timestamps.delay_from), prio),
            delay_to: TickCount::from_sysclock(clock.gate_sysclock(timestamps.delay_to), prio),
            frame_length,
            timestamp_id,
            fail_policy,
        });

        #[allow(clippy::indexing_slicing)]
        self.qav[tc_id].spend(from, u64::from(frame_length));
        #[allow(clippy::indexing_slicing)]
        {
            self.queue_available_at[usize::from(prio)] += duration_ns;
        }
        self.total_available_at += duration_ns;

        Ok(true)
    }

    /// Applies an mqprio update. Rejected updates leave the previous
    /// mapping intact.
    pub(crate) fn set_mqprio(&mut self, update: &MqprioUpdate) -> Result<()> {
        if usize::from(update.num_tc) >= TC_QOPT_MAX_QUEUE {
            return Err(TsnError::InvalidInput("invalid number of tc".into()));
        }
        if update
            .prio_tc_map
            .iter()
            .any(|&tc| usize::from(tc) >= TC_COUNT)
        {
            return Err(TsnError::InvalidInput("prio map out of range".into()));
        }
        let _ = (update.queue_count, update.queue_offset);
        self.mqprio = MqprioConfig {
            num_tc: update.num_tc,
            prio_tc_map: update.prio_tc_map,
        };
        Ok(())
    }

    /// Applies a credit-based shaper update for one queue.
    pub(crate) fn set_qav(&mut self, queue: usize, params: QavParams) -> Result<()> {
        if queue >= TC_COUNT {
            return Err(TsnError::InvalidInput("queue index out of range".into()));
        }
        #[allow(clippy::indexing_slicing)]
        let qav = &mut self.qav[queue];
        qav.enabled = params.enable;
        qav.hi_credit = f64::from(params.hi_credit) * 1000.0;
        qav.lo_credit = f64::from(params.lo_credit) * 1000.0;
        qav.idle_slope = f64::from(params.idle_slope) / 1000.0;
        qav.send_slope = f64::from(params.send_slope) / 1000.0;

        self.rebake();
        Ok(())
    }

    /// Replaces or destroys the gate schedule.
    pub(crate) fn set_qbv(
        &mut self,
        enable: bool,
        base_time: Timestamp,
        entries: &[QbvEntry],
    ) -> Result<()> {
        if entries.len() > MAX_QBV_SLOTS {
            return Err(TsnError::InvalidInput("too many schedule entries".into()));
        }
        if enable && !validate_slots(entries.len()) {
            return Err(TsnError::InvalidInput("empty schedule".into()));
        }

        self.qbv.enabled = enable;
        if enable {
            self.qbv.start = base_time;
            self.qbv.slots = entries
                .iter()
                .map(|entry| {
                    let mut opened_prios = [false; TC_COUNT];
                    for (tc, opened) in opened_prios.iter_mut().enumerate() {
                        *opened = entry.gate_mask & (1 << tc) != 0;
                    }
                    QbvSlot {
                        duration_ns: entry.interval_ns,
                        opened_prios,
                    }
                })
                .collect();
        }

        self.rebake();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn tracker_mut(&mut self) -> &mut BufferTracker {
        &mut self.tracker
    }

    #[cfg(test)]
    pub(crate) fn qav_mut(&mut self, tc: usize) -> &mut QavState {
        &mut self.qav[tc]
    }
}

/// VLAN priority code point of the frame, 0 when untagged.
fn vlan_pcp(data: &[u8]) -> u8 {
    let Some(eth) = EthernetPacket::new(data) else {
        return 0;
    };
    if eth.get_ethertype() != EtherType::new(crate::constants::ETH_TYPE_VLAN) {
        return 0;
    }
    VlanPacket::new(eth.payload()).map_or(0, |vlan| vlan.get_priority_code_point().0)
}

/// gPTP detection, tagged or untagged.
fn is_gptp(data: &[u8]) -> bool {
    let Some(eth) = EthernetPacket::new(data) else {
        return false;
    };
    let ptp = EtherType::new(ETH_TYPE_PTPV2);
    if eth.get_ethertype() == ptp {
        return true;
    }
    if eth.get_ethertype() == EtherType::new(crate::constants::ETH_TYPE_VLAN) {
        return VlanPacket::new(eth.payload()).is_some_and(|vlan| vlan.get_ethertype() == ptp);
    }
    false
}

/// Picks the gate window for a frame ready at `from`.
///
/// `None` means the gate never opens for this class and the frame must
/// be dropped.
#[allow(clippy::indexing_slicing)]
pub(crate) fn get_timestamps(
    qbv: &QbvConfig,
    baked: &QbvBakedConfig,
    from: Timestamp,
    tc_id: usize,
    bytes: u64,
    consider_delay: bool,
) -> Option<Timestamps> {
    let mut timestamps = Timestamps::default();

    if !qbv.enabled {
        // no gating; delay_* is pointless, keep it right next to the frame
        timestamps.from = from;
        timestamps.to = always_open(timestamps.from);
        timestamps.delay_from = timestamps.from;
        timestamps.delay_to = always_open(timestamps.delay_from);
        return Some(timestamps);
    }

    let baked_prio = baked.prios.get(tc_id)?;
    let sending_duration = bytes_to_ns(bytes);

    if let Some(opened) = baked_prio.always_state() {
        if !opened {
            return None;
        }
        timestamps.from = from;
        timestamps.to = always_open(timestamps.from);
        if consider_delay {
            timestamps.delay_from = timestamps.from;
            timestamps.delay_to = always_open(timestamps.delay_from);
        }
        return Some(timestamps);
    }

    if baked.cycle_ns == 0 {
        return None;
    }

    let slots = &baked_prio.slots;
    let slot_count = slots.len();
    let mut remainder = from.wrapping_sub(qbv.start) % baked.cycle_ns;
    let mut slot_id = 0;

    while remainder > slots[slot_id].duration_ns {
        remainder -= slots[slot_id].duration_ns;
        slot_id += 1;
    }

    // 1. "from"
    if slots[slot_id].opened {
        if slots[slot_id].duration_ns - remainder < sending_duration {
            // remaining time is too short for the frame; the slots are
            // open/close pairs, so skip two
            timestamps.from = from
                .wrapping_sub(remainder)
                .wrapping_add(slots[slot_id].duration_ns);
            slot_id = (slot_id + 1) % slot_count;
            timestamps.from = timestamps.from.wrapping_add(slots[slot_id].duration_ns);
            slot_id = (slot_id + 1) % slot_count;
        } else {
            timestamps.from = from.wrapping_sub(remainder);
        }
    } else {
        // wait for the next open slot
        timestamps.from = from
            .wrapping_sub(remainder)
            .wrapping_add(slots[slot_id].duration_ns);
        slot_id = (slot_id + 1) % slot_count;
    }

    // 2. "to"
    timestamps.to = timestamps.from.wrapping_add(slots[slot_id].duration_ns);

    if consider_delay {
        // 3. "delay_from": end of this open slot plus the close after it
        timestamps.delay_from = timestamps.from.wrapping_add(slots[slot_id].duration_ns);
        slot_id = (slot_id + 1) % slot_count;
        timestamps.delay_from = timestamps.delay_from.wrapping_add(slots[slot_id].duration_ns);
        slot_id = (slot_id + 1) % slot_count;
        // 4. "delay_to"
        timestamps.delay_to = timestamps.delay_from.wrapping_add(slots[slot_id].duration_ns);
    }

    // clamp up if the ready time is already inside the slot, and leave
    // room for the frame to finish before the gate closes
    timestamps.from = timestamps.from.max(from);
    timestamps.to = timestamps.to.wrapping_sub(sending_duration);
    if consider_delay {
        timestamps.delay_to = timestamps.delay_to.wrapping_sub(sending_duration);
    }

    Some(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::PtpClock,
        constants::{HW_QUEUE_SIZE, MAX_BUFFER_LENGTH, NS_IN_1S},
        csr::emulated::EmulatedAdaptor,
        mem::{BufHandle, FrameArena},
        metadata::TX_METADATA_SIZE,
    };

    fn engine() -> (EmulatedAdaptor, PtpClock<EmulatedAdaptor>, TsnEngine<EmulatedAdaptor>) {
        let dev = EmulatedAdaptor::new();
        dev.set_sys_clock(0);
        let clock = PtpClock::new(dev.clone(), 0).unwrap();
        let engine = TsnEngine::new(dev.clone(), true);
        (dev, clock, engine)
    }

    fn vlan_frame(pcp: u8, len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        frame[..6].copy_from_slice(&[0xff; 6]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame[12..14].copy_from_slice(&0x8100u16.to_be_bytes());
        frame[14] = pcp << 5;
        frame[15] = 0x01; // vid 1
        frame[16..18].copy_from_slice(&0x0800u16.to_be_bytes());
        frame
    }

    fn untagged_frame(len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        frame[..6].copy_from_slice(&[0xff; 6]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        frame
    }

    fn gptp_frame(len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        frame[..6].copy_from_slice(&[0x01, 0x80, 0xc2, 0, 0, 0x0e]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame[12..14].copy_from_slice(&0x88F7u16.to_be_bytes());
        frame
    }

    /// Copies `payload` into an arena slot and stamps the length stub.
    fn load_frame(arena: &FrameArena, handle: BufHandle, payload: &[u8]) {
        let mut tx = arena.tx_frame(handle);
        tx.data_mut()[..payload.len()].copy_from_slice(payload);
        #[allow(clippy::cast_possible_truncation)]
        tx.set_metadata(&TxMetadata {
            frame_length: payload.len() as u16,
            ..TxMetadata::default()
        });
    }

    fn open_slot_config() -> Vec<QbvEntry> {
        vec![QbvEntry {
            gate_mask: 0xFF,
            interval_ns: NS_IN_1S as u32,
        }]
    }

    #[test]
    fn classification_helpers() {
        assert_eq!(vlan_pcp(&vlan_frame(5, 100)), 5);
        assert_eq!(vlan_pcp(&untagged_frame(100)), 0);
        assert!(is_gptp(&gptp_frame(100)));
        assert!(!is_gptp(&untagged_frame(100)));
    }

    #[test]
    fn always_open_gate_admits_vlan_frame() {
        let (_dev, clock, mut engine) = engine();
        engine.set_qbv(true, 0, &open_slot_config()).unwrap();

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();
        load_frame(&arena, handle, &vlan_frame(5, 100));

        let mut frame = arena.tx_frame(handle);
        let now = NS_IN_1S;
        assert!(engine.fill_metadata(&clock, now, &mut frame).unwrap());

        let meta = frame.metadata().unwrap();
        assert_eq!(meta.fail_policy, FailPolicy::Retry);
        assert_eq!(meta.timestamp_id, TimestampId::Normal);
        assert_eq!(meta.from.priority_value(), TsnPrio::Vlan as u8);
        // the always-open sentinel collapses into sysclock space
        let expected_from = clock.gate_sysclock(now + H2C_LATENCY_NS);
        assert_eq!(u64::from(meta.from.tick_value()), expected_from & crate::metadata::TICK_MASK);
        assert_eq!(
            meta.to.tick_value(),
            TickCount::from_sysclock(always_open(expected_from), 5).tick_value()
        );
        assert_eq!(engine.pending_packets(), 1);
        assert_eq!(engine.total_available_at(), 800);
    }

    #[test]
    fn gptp_frames_take_the_gptp_queue_and_timestamp_id() {
        let (_dev, clock, mut engine) = engine();
        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();
        load_frame(&arena, handle, &gptp_frame(90));

        let mut frame = arena.tx_frame(handle);
        assert!(engine.fill_metadata(&clock, 1_000, &mut frame).unwrap());
        let meta = frame.metadata().unwrap();
        assert_eq!(meta.from.priority_value(), TsnPrio::Gptp as u8);
        assert_eq!(meta.timestamp_id, TimestampId::Gptp);
    }

    #[test]
    fn timestamping_off_clears_the_id() {
        let dev = EmulatedAdaptor::new();
        dev.set_sys_clock(0);
        let clock = PtpClock::new(dev.clone(), 0).unwrap();
        let mut engine = TsnEngine::new(dev, false);

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();
        load_frame(&arena, handle, &untagged_frame(100));
        let mut frame = arena.tx_frame(handle);
        assert!(engine.fill_metadata(&clock, 0, &mut frame).unwrap());
        assert_eq!(frame.metadata().unwrap().timestamp_id, TimestampId::None);
    }

    #[test]
    fn closed_half_cycle_defers_to_the_next_open_edge() {
        let qav = [QavState::default(); TC_COUNT];
        let mut qbv = QbvConfig {
            enabled: true,
            start: 0,
            slots: vec![
                QbvSlot {
                    duration_ns: 500_000_000,
                    opened_prios: {
                        let mut open = [false; TC_COUNT];
                        open[0] = true;
                        open
                    },
                },
                QbvSlot {
                    duration_ns: 500_000_000,
                    opened_prios: [false; TC_COUNT],
                },
            ],
        };
        let baked = bake(&mut qbv, &qav);

        // inside the closed half of the cycle
        let from = 600_000_000 + H2C_LATENCY_NS;
        let ts = get_timestamps(&qbv, &baked, from, 0, 100, false).unwrap();
        assert_eq!(ts.from, NS_IN_1S);
        assert_eq!(ts.to, NS_IN_1S + 500_000_000 - 800);
    }

    #[test]
    fn short_slot_is_skipped_when_the_frame_does_not_fit() {
        let qav = [QavState::default(); TC_COUNT];
        let mut open0 = [false; TC_COUNT];
        open0[0] = true;
        let mut qbv = QbvConfig {
            enabled: true,
            start: 0,
            slots: vec![
                QbvSlot {
                    duration_ns: 50_000,
                    opened_prios: open0,
                },
                QbvSlot {
                    duration_ns: 500_000,
                    opened_prios: [false; TC_COUNT],
                },
                QbvSlot {
                    duration_ns: 100_000,
                    opened_prios: open0,
                },
                QbvSlot {
                    duration_ns: 350_000,
                    opened_prios: [false; TC_COUNT],
                },
            ],
        };
        let baked = bake(&mut qbv, &qav);

        // 1500 bytes is 12 us on the wire, more than the 50 us slot has
        // left at 45 us in
        let ts = get_timestamps(&qbv, &baked, 45_000, 0, 1_500, true).unwrap();
        // skipped to the second open slot
        assert_eq!(ts.from, 550_000);
        assert!(ts.to >= ts.from);
        assert!(ts.to - ts.from + 12_000 <= 100_000);
        // delay window wraps into the next cycle's first open slot
        assert_eq!(ts.delay_from, 1_000_000);
        assert_eq!(ts.delay_to, 1_000_000 + 50_000 - 12_000);
        assert!(ts.from <= ts.to && ts.to < ts.delay_from && ts.delay_from <= ts.delay_to);
    }

    #[test]
    fn permanently_closed_gate_refuses_the_frame() {
        let (_dev, clock, mut engine) = engine();
        // tc 5 never opens
        engine
            .set_qbv(
                true,
                0,
                &[QbvEntry {
                    gate_mask: !(1 << 5),
                    interval_ns: 1_000_000,
                }],
            )
            .unwrap();

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();
        load_frame(&arena, handle, &vlan_frame(5, 100));
        let mut frame = arena.tx_frame(handle);
        assert!(!engine.fill_metadata(&clock, 0, &mut frame).unwrap());
        assert_eq!(engine.pending_packets(), 0);
    }

    #[test]
    fn full_hw_queue_refuses_without_side_effects() {
        let (_dev, clock, mut engine) = engine();
        engine.set_qbv(true, 0, &open_slot_config()).unwrap();
        engine
            .set_qav(
                5,
                QavParams {
                    enable: true,
                    idle_slope: 10_000,
                    send_slope: -90_000,
                    hi_credit: 1_000,
                    lo_credit: -1_000,
                },
            )
            .unwrap();
        engine.tracker_mut().preload(HW_QUEUE_SIZE, 0);

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();
        load_frame(&arena, handle, &vlan_frame(5, 100));
        let mut frame = arena.tx_frame(handle);

        let total_before = engine.total_available_at();
        let credit_before = engine.qav_mut(5).credit;
        assert!(!engine.fill_metadata(&clock, 0, &mut frame).unwrap());
        assert_eq!(engine.total_available_at(), total_before);
        assert_eq!(engine.qav_mut(5).credit, credit_before);
        assert_eq!(engine.pending_packets(), HW_QUEUE_SIZE);
    }

    #[test]
    fn best_effort_respects_its_tighter_cap() {
        let (_dev, clock, mut engine) = engine();
        engine.set_qbv(true, 0, &open_slot_config()).unwrap();
        engine.tracker_mut().preload(BE_QUEUE_SIZE, 0);

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();

        load_frame(&arena, handle, &untagged_frame(100));
        let mut frame = arena.tx_frame(handle);
        assert!(!engine.fill_metadata(&clock, 0, &mut frame).unwrap());

        // a delay-sensitive frame still fits
        load_frame(&arena, handle, &vlan_frame(5, 100));
        let mut frame = arena.tx_frame(handle);
        assert!(engine.fill_metadata(&clock, 0, &mut frame).unwrap());
    }

    #[test]
    fn total_available_at_is_monotonic() {
        let (_dev, clock, mut engine) = engine();
        engine.set_qbv(true, 0, &open_slot_config()).unwrap();

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();

        let mut last = engine.total_available_at();
        for i in 0..32u64 {
            let payload = if i % 2 == 0 {
                vlan_frame(5, 64 + i as usize * 16)
            } else {
                untagged_frame(64 + i as usize * 16)
            };
            load_frame(&arena, handle, &payload);
            let mut frame = arena.tx_frame(handle);
            let _ = engine.fill_metadata(&clock, i * 10_000, &mut frame).unwrap();
            assert!(engine.total_available_at() >= last);
            last = engine.total_available_at();
        }
    }

    #[test]
    fn admitted_windows_are_ordered() {
        let (_dev, clock, mut engine) = engine();
        engine
            .set_qbv(
                true,
                0,
                &[
                    QbvEntry {
                        gate_mask: 0xFF,
                        interval_ns: 400_000,
                    },
                    QbvEntry {
                        gate_mask: 0x00,
                        interval_ns: 600_000,
                    },
                ],
            )
            .unwrap();

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();
        load_frame(&arena, handle, &vlan_frame(3, 128));
        let mut frame = arena.tx_frame(handle);
        assert!(engine.fill_metadata(&clock, 100_000, &mut frame).unwrap());

        // recompute the wall-time windows the metadata was stamped from
        let ts = get_timestamps(
            &engine.qbv,
            &engine.qbv_baked,
            100_000 + H2C_LATENCY_NS,
            3,
            128,
            true,
        )
        .unwrap();
        assert!(ts.from <= ts.to);
        assert!(ts.to < ts.delay_from && ts.delay_from <= ts.delay_to);
    }

    #[test]
    fn qbv_disabled_with_qav_enabled_uses_open_window() {
        let qav = [QavState::default(); TC_COUNT];
        let qbv = QbvConfig::default();
        let baked = QbvBakedConfig::default();
        let _ = qav;
        let ts = get_timestamps(&qbv, &baked, 42_000, 0, 100, true).unwrap();
        assert_eq!(ts.from, 42_000);
        assert_eq!(ts.to, always_open(42_000));
        assert_eq!(ts.delay_to, always_open(ts.delay_from));
    }

    #[test]
    fn config_updates_validate_bounds() {
        let (_dev, _clock, mut engine) = engine();

        assert!(engine
            .set_qbv(
                true,
                0,
                &vec![
                    QbvEntry {
                        gate_mask: 0xFF,
                        interval_ns: 1_000
                    };
                    MAX_QBV_SLOTS + 1
                ],
            )
            .is_err());
        assert!(engine.set_qbv(true, 0, &[]).is_err());

        assert!(engine
            .set_qav(
                TC_COUNT,
                QavParams {
                    enable: true,
                    idle_slope: 1,
                    send_slope: -1,
                    hi_credit: 1,
                    lo_credit: -1,
                },
            )
            .is_err());

        let mut update = MqprioUpdate {
            num_tc: TC_QOPT_MAX_QUEUE as u8,
            queue_count: [0; TC_QOPT_MAX_QUEUE],
            queue_offset: [0; TC_QOPT_MAX_QUEUE],
            prio_tc_map: [0; TC_QOPT_MAX_QUEUE],
        };
        assert!(engine.set_mqprio(&update).is_err());
        update.num_tc = 4;
        update.prio_tc_map[3] = TC_COUNT as u8;
        assert!(engine.set_mqprio(&update).is_err());
        update.prio_tc_map[3] = 2;
        assert!(engine.set_mqprio(&update).is_ok());
    }

    #[test]
    fn mqprio_map_steers_the_traffic_class() {
        let (_dev, clock, mut engine) = engine();
        let mut update = MqprioUpdate {
            num_tc: 2,
            queue_count: [0; TC_QOPT_MAX_QUEUE],
            queue_offset: [0; TC_QOPT_MAX_QUEUE],
            prio_tc_map: [0; TC_QOPT_MAX_QUEUE],
        };
        update.prio_tc_map[5] = 1;
        engine.set_mqprio(&update).unwrap();
        // close tc 1 only; a pcp 5 frame now maps onto the closed class
        engine
            .set_qbv(
                true,
                0,
                &[QbvEntry {
                    gate_mask: !(1 << 1),
                    interval_ns: 1_000_000,
                }],
            )
            .unwrap();

        let arena = FrameArena::new().unwrap();
        let handle = BufHandle::new(0).unwrap();
        load_frame(&arena, handle, &vlan_frame(5, 100));
        let mut frame = arena.tx_frame(handle);
        assert!(!engine.fill_metadata(&clock, 0, &mut frame).unwrap());
    }

    #[test]
    fn oversized_stub_is_within_slot_bounds() {
        // guard against the metadata stub reporting more payload than a
        // slot can carry
        assert!(TxFrame::MAX_DATA_LEN < MAX_BUFFER_LENGTH);
        assert_eq!(TxFrame::MAX_DATA_LEN + TX_METADATA_SIZE, MAX_BUFFER_LENGTH);
    }
}
