use parking_lot::Mutex;
use std::{collections::HashMap, io, sync::Arc};

use super::{DeviceAdaptor, REG_SYS_CLOCK_HI, REG_SYS_CLOCK_LO, REG_TX_DROP_PACKETS, REG_TX_PACKETS};

/// In-memory register file standing in for the gate engine.
///
/// Mirrors the clear-on-read behaviour of the transmit counters so the
/// tracker and clock paths can be exercised without hardware.
#[derive(Clone, Debug, Default)]
pub struct EmulatedAdaptor {
    regs: Arc<Mutex<HashMap<usize, u32>>>,
}

impl EmulatedAdaptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a raw register value.
    pub fn set(&self, addr: usize, value: u32) {
        let _ = self.regs.lock().insert(addr, value);
    }

    pub fn get(&self, addr: usize) -> u32 {
        self.regs.lock().get(&addr).copied().unwrap_or(0)
    }

    /// Loads the 64-bit sys-clock register pair.
    pub fn set_sys_clock(&self, value: u64) {
        let mut regs = self.regs.lock();
        #[allow(clippy::cast_possible_truncation)]
        {
            let _ = regs.insert(REG_SYS_CLOCK_HI, (value >> 32) as u32);
            let _ = regs.insert(REG_SYS_CLOCK_LO, value as u32);
        }
    }
}

impl DeviceAdaptor for EmulatedAdaptor {
    fn read_csr(&self, addr: usize) -> io::Result<u32> {
        let mut regs = self.regs.lock();
        let value = regs.get(&addr).copied().unwrap_or(0);
        if addr == REG_TX_PACKETS || addr == REG_TX_DROP_PACKETS {
            let _ = regs.insert(addr, 0);
        }
        Ok(value)
    }

    fn write_csr(&self, addr: usize, data: u32) -> io::Result<()> {
        let _ = self.regs.lock().insert(addr, data);
        Ok(())
    }
}
