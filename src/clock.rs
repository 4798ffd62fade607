//! Bridge between wall-time nanoseconds and raw device cycles.
//!
//! The device free-runs a 125 MHz cycle counter; PTP discipline arrives
//! from the outside as `settime`/`adjtime`/`adjfine` calls. The bridge
//! keeps a floating scale and an offset so every other component can
//! reason in nanoseconds.

use std::io;

use parking_lot::Mutex;

use crate::{
    constants::{NS_IN_1S, PHY_DELAY_CLOCKS, RESERVED_CYCLE, RX_ADJUST_NS, TICKS_SCALE, TX_ADJUST_NS},
    csr::{self, DeviceAdaptor, REG_CYCLE_1S, REG_NEXT_PULSE_AT_HI, REG_NEXT_PULSE_AT_LO},
    types::{Sysclock, Timestamp},
};

#[derive(Debug, Clone, Copy)]
struct ClockState {
    /// Nanoseconds per device cycle.
    ticks_scale: f64,
    /// Wall-time of device cycle zero. Wraps; all arithmetic is two's
    /// complement.
    offset: u64,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn timestamp_of(state: ClockState, sys_count: Sysclock) -> Timestamp {
    let timestamp = (state.ticks_scale * sys_count as f64) as u64;
    timestamp.wrapping_add(state.offset)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn sysclock_of(state: ClockState, timestamp: Timestamp) -> Sysclock {
    (timestamp.wrapping_sub(state.offset) as f64 / state.ticks_scale) as u64
}

/// The device side of the PTP clock.
#[derive(Debug)]
pub(crate) struct PtpClock<Dev> {
    dev: Dev,
    state: Mutex<ClockState>,
}

impl<Dev: DeviceAdaptor> PtpClock<Dev> {
    /// Creates the clock bridge and aligns it to `host_now`.
    pub(crate) fn new(dev: Dev, host_now: Timestamp) -> io::Result<Self> {
        let clock = Self {
            dev,
            state: Mutex::new(ClockState {
                ticks_scale: TICKS_SCALE,
                offset: 0,
            }),
        };
        clock.settime(host_now)?;
        Ok(clock)
    }

    /// Reads the raw device cycle counter.
    pub(crate) fn sysclock(&self) -> io::Result<Sysclock> {
        csr::read_sys_clock(&self.dev)
    }

    pub(crate) fn sysclock_to_timestamp(&self, sysclock: Sysclock) -> Timestamp {
        timestamp_of(*self.state.lock(), sysclock)
    }

    pub(crate) fn timestamp_to_sysclock(&self, timestamp: Timestamp) -> Sysclock {
        sysclock_of(*self.state.lock(), timestamp)
    }

    /// RX hardware timestamps carry the MAC+PHY ingress depth.
    pub(crate) fn rx_timestamp(&self, sysclock: Sysclock) -> Timestamp {
        self.sysclock_to_timestamp(sysclock).wrapping_sub(RX_ADJUST_NS)
    }

    pub(crate) fn sysclock_to_tx_timestamp(&self, sysclock: Sysclock) -> Timestamp {
        self.sysclock_to_timestamp(sysclock).wrapping_add(TX_ADJUST_NS)
    }

    /// Converts a gate edge to the sys-clock instant at which the MAC
    /// must start so the frame crosses the PHY on time.
    pub(crate) fn gate_sysclock(&self, timestamp: Timestamp) -> Sysclock {
        self.timestamp_to_sysclock(timestamp.wrapping_sub(TX_ADJUST_NS))
            .wrapping_sub(PHY_DELAY_CLOCKS)
    }

    /// Current wall-time.
    pub(crate) fn gettime(&self) -> io::Result<Timestamp> {
        let state = self.state.lock();
        let clock = csr::read_sys_clock(&self.dev)?;
        Ok(timestamp_of(*state, clock))
    }

    /// Steps the clock to `host_timestamp` and resets the scale.
    pub(crate) fn settime(&self, host_timestamp: Timestamp) -> io::Result<()> {
        let mut state = self.state.lock();
        state.ticks_scale = TICKS_SCALE;

        let sys_clock = csr::read_sys_clock(&self.dev)?;
        let hw_timestamp = timestamp_of(*state, sys_clock);
        state.offset = host_timestamp.wrapping_sub(hw_timestamp);

        self.set_cycle_1s(RESERVED_CYCLE)?;
        self.set_pulse_at(*state, sys_clock)
    }

    /// Shifts the clock by a signed delta.
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn adjtime(&self, delta: i64) -> io::Result<()> {
        let mut state = self.state.lock();
        state.offset = state.offset.wrapping_add(delta as u64);

        let sys_clock = csr::read_sys_clock(&self.dev)?;
        self.set_pulse_at(*state, sys_clock)
    }

    /// Adjusts the cycle scale by `scaled_ppm` (parts per million as a
    /// 16.16 fixed-point value), keeping the currently observed
    /// timestamp continuous across the change.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn adjfine(&self, scaled_ppm: i64) -> io::Result<()> {
        let mut state = self.state.lock();

        let sys_clock = csr::read_sys_clock(&self.dev)?;
        if scaled_ppm == 0 {
            return Ok(());
        }

        let cur_timestamp = timestamp_of(*state, sys_clock);

        let is_negative = scaled_ppm < 0;
        let magnitude = scaled_ppm.unsigned_abs();

        let diff = TICKS_SCALE * magnitude as f64 / (1_000_000u64 << 16) as f64;
        state.ticks_scale = TICKS_SCALE + if is_negative { -diff } else { diff };

        let new_timestamp = timestamp_of(*state, sys_clock);
        state.offset = state
            .offset
            .wrapping_add(cur_timestamp.wrapping_sub(new_timestamp));

        self.set_cycle_1s((NS_IN_1S as f64 / state.ticks_scale) as u32)?;

        let sys_clock = csr::read_sys_clock(&self.dev)?;
        self.set_pulse_at(*state, sys_clock)
    }

    fn set_cycle_1s(&self, cycle_1s: u32) -> io::Result<()> {
        self.dev.write_csr(REG_CYCLE_1S, cycle_1s)
    }

    /// Programs the pulse register with the next 1-second edge.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_pulse_at(&self, state: ClockState, sys_count: Sysclock) -> io::Result<()> {
        let current_ns = timestamp_of(state, sys_count);
        let next_pulse_ns = current_ns - (current_ns % NS_IN_1S) + NS_IN_1S;
        let next_pulse_sysclock =
            (next_pulse_ns.wrapping_sub(state.offset) as f64 / state.ticks_scale) as u64;
        csr::write_u64(
            &self.dev,
            REG_NEXT_PULSE_AT_HI,
            REG_NEXT_PULSE_AT_LO,
            next_pulse_sysclock,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::emulated::EmulatedAdaptor;

    fn clock_at(sys_clock: u64, host_now: u64) -> (EmulatedAdaptor, PtpClock<EmulatedAdaptor>) {
        let dev = EmulatedAdaptor::new();
        dev.set_sys_clock(sys_clock);
        let clock = PtpClock::new(dev.clone(), host_now).unwrap();
        (dev, clock)
    }

    #[test]
    fn sysclock_roundtrip_within_one_cycle() {
        let (_dev, clock) = clock_at(0, 0);
        for s in [0u64, 1, 125_000_000, 1 << 40, (1 << 60) / 8 - 1] {
            let t = clock.sysclock_to_timestamp(s);
            let back = clock.timestamp_to_sysclock(t);
            assert!(back.abs_diff(s) <= 1, "sysclock {s} came back as {back}");
        }
    }

    #[test]
    fn settime_aligns_to_host_clock() {
        let (_dev, clock) = clock_at(1_000, 5_000_000_000);
        // 1000 cycles at 8 ns/cycle have elapsed on the device
        assert_eq!(clock.gettime().unwrap(), 5_000_000_000);
        assert_eq!(clock.timestamp_to_sysclock(5_000_000_000), 1_000);
    }

    #[test]
    fn settime_programs_next_pulse_edge() {
        let (dev, clock) = clock_at(0, 1_500_000_000);
        clock.settime(1_500_000_000).unwrap();
        let pulse = csr::read_u64(&dev, REG_NEXT_PULSE_AT_HI, REG_NEXT_PULSE_AT_LO).unwrap();
        // next wall-clock second is at 2.0 s, half a second (62.5M cycles) away
        assert_eq!(clock.sysclock_to_timestamp(pulse), 2_000_000_000);
        assert_eq!(dev.get(REG_CYCLE_1S), RESERVED_CYCLE);
    }

    #[test]
    fn adjtime_shifts_offset() {
        let (_dev, clock) = clock_at(0, 1_000_000_000);
        clock.adjtime(-250).unwrap();
        assert_eq!(clock.gettime().unwrap(), 999_999_750);
        clock.adjtime(250).unwrap();
        assert_eq!(clock.gettime().unwrap(), 1_000_000_000);
    }

    #[test]
    fn adjfine_keeps_current_timestamp_continuous() {
        let (_dev, clock) = clock_at(1 << 20, 3_000_000_000);
        let before = clock.gettime().unwrap();
        clock.adjfine(1_234_567).unwrap();
        let after = clock.gettime().unwrap();
        assert!(after.abs_diff(before) <= 1);
    }

    #[test]
    fn adjfine_scales_future_cycles() {
        let (dev, clock) = clock_at(0, 0);
        clock.adjfine(65_536_000).unwrap(); // +1000 ppm
        dev.set_sys_clock(1_000_000);
        let t = clock.gettime().unwrap();
        // 1M cycles at 8.008 ns/cycle
        assert_eq!(t, 8_008_000);
    }

    #[test]
    fn rx_and_tx_adjust_are_applied() {
        let (_dev, clock) = clock_at(0, 0);
        assert_eq!(clock.rx_timestamp(1_000), 8_000 - RX_ADJUST_NS);
        assert_eq!(clock.sysclock_to_tx_timestamp(1_000), 8_000 + TX_ADJUST_NS);
    }

    #[test]
    fn gate_sysclock_subtracts_phy_depth() {
        let (_dev, clock) = clock_at(0, 0);
        let ts = 80_000u64;
        let gate = clock.gate_sysclock(ts);
        assert_eq!(gate, (80_000 - TX_ADJUST_NS) / 8 - PHY_DELAY_CLOCKS);
    }
}
