//! Credit-based shaper state (IEEE 802.1Qav), one per traffic class.

use log::error;

use crate::{
    constants::{ETH_ZLEN, NS_IN_1S},
    types::Timestamp,
};

/// Nanoseconds on the wire for a frame of `bytes`, minimum frame padding
/// included.
///
/// TODO: read the negotiated link speed instead of assuming 1 Gb/s.
pub(crate) fn bytes_to_ns(bytes: u64) -> u64 {
    let link_speed = NS_IN_1S; // 1 Gb/s: one bit per nanosecond
    bytes.max(ETH_ZLEN) * 8 * NS_IN_1S / link_speed
}

/// Per-class shaper state. Credit accumulates at `idle_slope` while the
/// class waits and is spent at `send_slope` while it transmits, clamped
/// to `[lo_credit, hi_credit]`.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct QavState {
    pub(crate) enabled: bool,
    /// Credits per nanosecond gained while idle.
    pub(crate) idle_slope: f64,
    /// Credits per nanosecond spent while sending (negative).
    pub(crate) send_slope: f64,
    pub(crate) hi_credit: f64,
    pub(crate) lo_credit: f64,

    pub(crate) credit: f64,
    pub(crate) last_update: Timestamp,
    /// Earliest instant the class may transmit again.
    pub(crate) available_at: Timestamp,
}

impl QavState {
    /// Charges the shaper for `bytes` transmitted starting at `at` and
    /// recomputes `available_at`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn spend(&mut self, at: Timestamp, bytes: u64) {
        if !self.enabled {
            return;
        }

        if at < self.last_update || at < self.available_at {
            error!("invalid timestamp for Qav spending");
            return;
        }

        let elapsed_from_last_update = at - self.last_update;
        let earned_credit = elapsed_from_last_update as f64 * self.idle_slope;
        self.credit += earned_credit;
        if self.credit > self.hi_credit {
            self.credit = self.hi_credit;
        }

        let sending_duration = bytes_to_ns(bytes);
        let spending_credit = sending_duration as f64 * self.send_slope;
        self.credit += spending_credit;
        if self.credit < self.lo_credit {
            self.credit = self.lo_credit;
        }

        let send_end = at + sending_duration;
        self.last_update = send_end;
        if self.credit < 0.0 {
            self.available_at = send_end + (-(self.credit / self.idle_slope)) as u64;
        } else {
            self.available_at = send_end;
        }
    }
}
