//! Frame metadata headers exchanged with the gate engine.
//!
//! Every egress frame carries a 24-byte big-endian header of four
//! `(tick, priority)` gate edges plus length, timestamp id and fail
//! policy; every ingress frame carries a 10-byte header with the RX
//! hardware timestamp and length.

use bilge::prelude::*;

use crate::types::Sysclock;

/// Byte length of the egress metadata header.
pub(crate) const TX_METADATA_SIZE: usize = 24;
/// Byte length of the ingress metadata header.
pub(crate) const RX_METADATA_SIZE: usize = 10;

/// Sys-clock ticks are truncated to this width in gate edges.
pub(crate) const TICK_BITS: u32 = 29;
pub(crate) const TICK_MASK: u64 = (1 << TICK_BITS) - 1;

/// A gate edge: 29 bits of truncated sys-clock and 3 bits of priority.
#[bitsize(32)]
#[derive(Default, Clone, Copy, PartialEq, DebugBits, FromBits)]
pub(crate) struct TickCount {
    priority: u3,
    tick: u29,
}

impl TickCount {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn from_sysclock(sysclock: Sysclock, priority: u8) -> Self {
        Self::new(
            u3::from_u8(priority & 0x7),
            u29::from_u32((sysclock & TICK_MASK) as u32),
        )
    }

    pub(crate) fn tick_value(self) -> u32 {
        self.tick().value()
    }

    pub(crate) fn priority_value(self) -> u8 {
        self.priority().value()
    }
}

/// Which TX timestamp register the device latches for this frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum TimestampId {
    #[default]
    None = 0,
    Gptp = 1,
    Normal = 2,
    Reserved1 = 3,
    Reserved2 = 4,
}

impl TimestampId {
    pub(crate) fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => TimestampId::None,
            1 => TimestampId::Gptp,
            2 => TimestampId::Normal,
            3 => TimestampId::Reserved1,
            4 => TimestampId::Reserved2,
            _ => return None,
        })
    }

    /// Register index in 1..=4, or `None` when no timestamp is latched.
    pub(crate) fn register(self) -> Option<u8> {
        match self {
            TimestampId::None => None,
            #[allow(clippy::cast_possible_truncation)]
            other => Some(other as u8),
        }
    }
}

/// What the gate engine does when the window is missed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FailPolicy {
    #[default]
    Drop = 0,
    /// Retry inside the `(delay_from, delay_to)` window.
    Retry = 1,
}

/// Egress metadata header, prepended to every frame sent to the device.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct TxMetadata {
    pub(crate) from: TickCount,
    pub(crate) to: TickCount,
    pub(crate) delay_from: TickCount,
    pub(crate) delay_to: TickCount,
    pub(crate) frame_length: u16,
    pub(crate) timestamp_id: TimestampId,
    pub(crate) fail_policy: FailPolicy,
}

impl TxMetadata {
    /// Serializes into the first `TX_METADATA_SIZE` bytes of `buf`.
    #[allow(clippy::indexing_slicing)]
    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.from.value.to_be_bytes());
        buf[4..8].copy_from_slice(&self.to.value.to_be_bytes());
        buf[8..12].copy_from_slice(&self.delay_from.value.to_be_bytes());
        buf[12..16].copy_from_slice(&self.delay_to.value.to_be_bytes());
        buf[16..18].copy_from_slice(&self.frame_length.to_be_bytes());
        buf[18..20].copy_from_slice(&(self.timestamp_id as u16).to_be_bytes());
        buf[20] = self.fail_policy as u8;
        buf[21..24].fill(0);
    }

    /// Deserializes from the first `TX_METADATA_SIZE` bytes of `buf`.
    #[allow(clippy::indexing_slicing)]
    pub(crate) fn read_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < TX_METADATA_SIZE {
            return None;
        }
        let word = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let timestamp_id =
            TimestampId::from_raw(u16::from_be_bytes([buf[18], buf[19]]))?;
        let fail_policy = match buf[20] {
            0 => FailPolicy::Drop,
            1 => FailPolicy::Retry,
            _ => return None,
        };
        Some(Self {
            from: TickCount::from(word(0)),
            to: TickCount::from(word(4)),
            delay_from: TickCount::from(word(8)),
            delay_to: TickCount::from(word(12)),
            frame_length: u16::from_be_bytes([buf[16], buf[17]]),
            timestamp_id,
            fail_policy,
        })
    }
}

/// Ingress metadata header, prepended to every frame by the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RxMetadata {
    /// Raw sys-clock latched at ingress.
    pub(crate) timestamp: u64,
    pub(crate) frame_length: u16,
}

impl RxMetadata {
    #[allow(clippy::indexing_slicing)]
    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..10].copy_from_slice(&self.frame_length.to_be_bytes());
    }

    #[allow(clippy::indexing_slicing)]
    pub(crate) fn read_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < RX_METADATA_SIZE {
            return None;
        }
        Some(Self {
            timestamp: u64::from_be_bytes(buf[0..8].try_into().ok()?),
            frame_length: u16::from_be_bytes([buf[8], buf[9]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_count_packs_tick_above_priority() {
        let tc = TickCount::from_sysclock(0x1234_5678, 5);
        // truncated to 29 bits, shifted over the 3-bit priority
        assert_eq!(tc.value, (0x1234_5678 << 3) | 5);
        assert_eq!(tc.tick_value(), 0x1234_5678);
        assert_eq!(tc.priority_value(), 5);
    }

    #[test]
    fn tick_count_truncates_to_29_bits() {
        let tc = TickCount::from_sysclock(0xFFFF_FFFF_FFFF, 7);
        assert_eq!(u64::from(tc.tick_value()), TICK_MASK);
    }

    #[test]
    fn tx_metadata_layout_is_big_endian() {
        let meta = TxMetadata {
            from: TickCount::from_sysclock(1, 3),
            to: TickCount::from_sysclock(2, 3),
            delay_from: TickCount::from_sysclock(3, 3),
            delay_to: TickCount::from_sysclock(4, 3),
            frame_length: 0x1234,
            timestamp_id: TimestampId::Gptp,
            fail_policy: FailPolicy::Retry,
        };
        let mut buf = [0u8; TX_METADATA_SIZE];
        meta.write_to(&mut buf);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x0b]); // 1 << 3 | 3
        assert_eq!(&buf[16..18], &[0x12, 0x34]);
        assert_eq!(&buf[18..20], &[0x00, 0x01]);
        assert_eq!(buf[20], 1);
        assert_eq!(&buf[21..24], &[0, 0, 0]);
    }

    #[test]
    fn tx_metadata_roundtrip() {
        let meta = TxMetadata {
            from: TickCount::from_sysclock(0x0123_4567, 5),
            to: TickCount::from_sysclock(0x0123_4568, 5),
            delay_from: TickCount::from_sysclock(0x0123_4569, 5),
            delay_to: TickCount::from_sysclock(0x0123_456a, 5),
            frame_length: 1500,
            timestamp_id: TimestampId::Normal,
            fail_policy: FailPolicy::Drop,
        };
        let mut buf = [0u8; TX_METADATA_SIZE];
        meta.write_to(&mut buf);
        assert_eq!(TxMetadata::read_from(&buf), Some(meta));
    }

    #[test]
    fn rx_metadata_roundtrip() {
        let meta = RxMetadata {
            timestamp: 0x0102_0304_0506_0708,
            frame_length: 64,
        };
        let mut buf = [0u8; RX_METADATA_SIZE];
        meta.write_to(&mut buf);
        assert_eq!(&buf[0..2], &[0x01, 0x02]);
        assert_eq!(RxMetadata::read_from(&buf), Some(meta));
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(TxMetadata::read_from(&[0u8; 10]).is_none());
        assert!(RxMetadata::read_from(&[0u8; 4]).is_none());
    }
}
