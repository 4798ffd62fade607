//! Time-aware gate schedule (IEEE 802.1Qbv) and its compiled form.
//!
//! The user-visible schedule is an ordered list of slots, each opening a
//! subset of the eight traffic classes for a duration. The hot path
//! never walks that list; it reads a per-priority normalization into
//! open/close pairs with a precomputed cycle length.

use crate::{
    constants::{MAX_QBV_SLOTS, NS_IN_1S, TC_COUNT},
    qav::QavState,
    types::Timestamp,
};

/// One slot of the raw schedule. Cycles longer than one second are not
/// supported, hence the 32-bit duration.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct QbvSlot {
    pub(crate) duration_ns: u32,
    pub(crate) opened_prios: [bool; TC_COUNT],
}

/// The raw, user-visible schedule.
#[derive(Debug, Default, Clone)]
pub(crate) struct QbvConfig {
    pub(crate) enabled: bool,
    /// Absolute cycle origin.
    pub(crate) start: Timestamp,
    pub(crate) slots: Vec<QbvSlot>,
}

/// One entry of a compiled per-priority schedule.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BakedSlot {
    pub(crate) opened: bool,
    pub(crate) duration_ns: u64,
}

/// Compiled schedule of one priority: alternating open/close entries,
/// always an even number of them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct QbvBakedPrio {
    pub(crate) slots: Vec<BakedSlot>,
}

impl QbvBakedPrio {
    /// `Some(opened)` when the priority is permanently open or closed,
    /// recognizable by the zero-length parity entry.
    #[allow(clippy::indexing_slicing)]
    pub(crate) fn always_state(&self) -> Option<bool> {
        (self.slots.len() == 2 && self.slots[1].duration_ns == 0).then(|| self.slots[0].opened)
    }
}

/// Compiled schedule for all priorities.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct QbvBakedConfig {
    /// Sum of every raw slot duration.
    pub(crate) cycle_ns: u64,
    pub(crate) prios: [QbvBakedPrio; TC_COUNT],
}

/// Compiles the raw schedule into per-priority open/close pairs.
///
/// When gating is disabled and no shaper is enabled either, a single
/// always-open 1 s slot is synthesized so the metadata path runs
/// uniformly.
#[allow(clippy::indexing_slicing)]
pub(crate) fn bake(config: &mut QbvConfig, qav: &[QavState; TC_COUNT]) -> QbvBakedConfig {
    if !config.enabled {
        let qav_disabled = qav.iter().all(|state| !state.enabled);
        if qav_disabled {
            config.enabled = true;
            config.start = 0;
            config.slots = vec![QbvSlot {
                duration_ns: u32::try_from(NS_IN_1S).unwrap_or(u32::MAX),
                opened_prios: [true; TC_COUNT],
            }];
        }
    }

    let mut baked = QbvBakedConfig::default();
    let Some(first) = config.slots.first() else {
        return baked;
    };

    for tc_id in 0..TC_COUNT {
        baked.prios[tc_id].slots.push(BakedSlot {
            opened: first.opened_prios[tc_id],
            duration_ns: 0,
        });
    }

    for slot in &config.slots {
        let slot_duration = u64::from(slot.duration_ns);
        baked.cycle_ns += slot_duration;
        for tc_id in 0..TC_COUNT {
            let prio = &mut baked.prios[tc_id];
            let tail = prio
                .slots
                .last_mut()
                .unwrap_or_else(|| unreachable!("seeded with one entry"));
            if tail.opened == slot.opened_prios[tc_id] {
                // same state as the tail, just extend it
                tail.duration_ns += slot_duration;
            } else {
                prio.slots.push(BakedSlot {
                    opened: slot.opened_prios[tc_id],
                    duration_ns: slot_duration,
                });
            }
        }
    }

    // pad to an even entry count, the walk needs open/close pairs
    for prio in &mut baked.prios {
        if prio.slots.len() % 2 == 1 {
            let tail_opened = prio.slots[prio.slots.len() - 1].opened;
            prio.slots.push(BakedSlot {
                opened: !tail_opened,
                duration_ns: 0,
            });
        }
    }

    baked
}

/// Bounds check for a schedule update.
pub(crate) fn validate_slots(slot_count: usize) -> bool {
    (1..=MAX_QBV_SLOTS).contains(&slot_count)
}
