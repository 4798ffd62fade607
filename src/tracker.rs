//! Software mirror of the device transmit FIFO occupancy.
//!
//! The device never reports its queue depth directly; the tracker
//! reconstructs it by charging one slot per admitted frame and crediting
//! back the frames the cumulative transmit counters say have left.

use std::io;

use crate::{
    constants::{HW_QUEUE_SIZE, HW_QUEUE_SIZE_PAD},
    csr::{DeviceAdaptor, TxCounters},
};

#[derive(Debug, Default)]
pub(crate) struct BufferTracker {
    /// Frames currently resident in the device FIFO.
    pending_packets: u64,
    /// Cumulative device counter total at the last refresh.
    last_tx_count: u64,
}

impl BufferTracker {
    pub(crate) fn pending(&self) -> u64 {
        self.pending_packets
    }

    /// Claims one FIFO slot. Fails when the device queue is full.
    pub(crate) fn append(&mut self) -> bool {
        if self.pending_packets >= HW_QUEUE_SIZE {
            return false;
        }
        self.pending_packets += 1;
        true
    }

    /// Re-reads the device counters and credits back transmitted and
    /// dropped frames. Skipped while there is comfortable headroom; the
    /// register reads are not free.
    pub(crate) fn refresh<Dev: DeviceAdaptor>(
        &mut self,
        counters: &mut TxCounters<Dev>,
    ) -> io::Result<()> {
        if self.pending_packets < HW_QUEUE_SIZE - HW_QUEUE_SIZE_PAD {
            return Ok(());
        }

        let tx_count = counters
            .tx_packets()?
            .wrapping_add(counters.total_tx_drop_packets()?);
        let pop_count = tx_count.wrapping_sub(self.last_tx_count);
        self.last_tx_count = tx_count;
        self.pending_packets -= pop_count.min(self.pending_packets);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn preload(&mut self, pending: u64, last_tx_count: u64) {
        self.pending_packets = pending;
        self.last_tx_count = last_tx_count;
    }
}
