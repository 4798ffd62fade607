//! Device and scheduler constants. Values are bit-exact with the gate
//! engine and the XDMA character device interface.

/// Maximum number of buffer descriptors in one multi-descriptor transfer.
pub(crate) const MAX_BD_NUMBER: usize = 8;

/// Number of traffic classes.
pub(crate) const TC_COUNT: usize = 8;
/// Number of hardware priority queues.
pub(crate) const TSN_PRIO_COUNT: usize = 8;
/// Maximum number of slots in a Qbv schedule.
pub(crate) const MAX_QBV_SLOTS: usize = 20;
/// Upper bound on mqprio traffic class count.
pub(crate) const TC_QOPT_MAX_QUEUE: usize = 16;

/// Depth of the device transmit FIFO.
pub(crate) const HW_QUEUE_SIZE: u64 = 128;
/// Headroom below which the tracker skips polling the device counters.
pub(crate) const HW_QUEUE_SIZE_PAD: u64 = 20;
/// Admission cap for best-effort frames.
pub(crate) const BE_QUEUE_SIZE: u64 = HW_QUEUE_SIZE - 20;
/// Admission cap for delay-sensitive frames.
pub(crate) const TSN_QUEUE_SIZE: u64 = HW_QUEUE_SIZE - 2;

/// Host-to-card forward margin reserved so the device holds the frame
/// before its gate opens.
pub(crate) const H2C_LATENCY_NS: u64 = 30_000;
/// MAC + PHY egress pipeline depth.
pub(crate) const TX_ADJUST_NS: u64 = 100 + 200;
/// MAC + PHY ingress pipeline depth.
pub(crate) const RX_ADJUST_NS: u64 = 188 + 324;
/// 14 clocks from MAC to PHY, minus the occasional 1 tick error.
pub(crate) const PHY_DELAY_CLOCKS: u64 = 13;

/// Nominal nanoseconds per device cycle (125 MHz clock).
pub(crate) const TICKS_SCALE: f64 = 8.0;
/// Device cycles per second at the nominal scale.
pub(crate) const RESERVED_CYCLE: u32 = 125_000_000;

pub(crate) const NS_IN_1S: u64 = 1_000_000_000;

/// Gate window applied when no gate constrains the frame.
pub(crate) const DEFAULT_TO_MARGIN_NS: u64 = 50_000;

pub(crate) const ETH_TYPE_PTPV2: u16 = 0x88F7;
pub(crate) const ETH_TYPE_VLAN: u16 = 0x8100;
/// Minimum Ethernet frame length, padding included.
pub(crate) const ETH_ZLEN: u64 = 60;
pub(crate) const ETH_HLEN: usize = 14;

/// Byte length of one pool slot, metadata headroom included.
pub(crate) const MAX_BUFFER_LENGTH: usize = 2048;
/// Slots backing the general pool.
pub(crate) const NUMBER_OF_BUFFER: usize = 1024;
/// Slots backing the reserved pool, used for scheduler-originated
/// control frames.
pub(crate) const NUMBER_OF_RESERVED_BUFFER: usize = 64;
/// Alignment of the frame arena.
pub(crate) const BUFFER_ALIGNMENT: usize = 4096;
/// Device-reported buffer addresses may carry a 4-bit tag in the low bits.
pub(crate) const BUFFER_ADDRESS_MASK: u64 = !0xF;

/// Capacity of the raw and parsed descriptor queues.
pub(crate) const QUEUE_CAPACITY: usize = 1024;

/// Interval between scheduler-originated gPTP bursts.
pub(crate) const GPTP_PERIOD_NS: u64 = NS_IN_1S / 8;

/// Give up polling a TX timestamp register after this many stale reads.
pub(crate) const TX_TSTAMP_MAX_RETRY: u32 = 5;
/// A TX timestamp further than this behind the current sys-clock is only
/// partially written.
pub(crate) const TX_TSTAMP_UPDATE_THRESHOLD: u64 = 125_000_000;
/// Sys-clock error tolerated before a 29-bit tick is widened into the
/// next epoch.
pub(crate) const TX_WORK_OVERFLOW_MARGIN: u64 = 100;
