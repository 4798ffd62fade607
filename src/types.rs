/// Wall-time nanoseconds since the PTP epoch.
pub type Timestamp = u64;

/// Raw device cycle count.
pub type Sysclock = u64;
