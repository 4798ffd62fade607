use std::{sync::Arc, thread::JoinHandle};

use log::info;
use parking_lot::Mutex;

use crate::{
    clock::PtpClock,
    csr::DeviceAdaptor,
    gptp::GptpEngine,
    mem::{FrameArena, FramePool, TxFrame},
    metadata::TxMetadata,
    packet,
    queue::{DescQueue, FrameDesc},
    spawner::{pin_to_cpu, AbortSignal},
    stats::{bump, Stats},
};

/// Classifier stage: turns received frames into replies in place and
/// moves them to the parsed queue.
pub(crate) struct ParserWorker<Dev> {
    pub(crate) arena: Arc<FrameArena>,
    pub(crate) pool: Arc<FramePool>,
    pub(crate) raw_queue: Arc<DescQueue>,
    pub(crate) parsed_queue: Arc<DescQueue>,
    pub(crate) clock: Arc<PtpClock<Dev>>,
    pub(crate) gptp: Arc<Mutex<GptpEngine>>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) station_mac: [u8; 6],
    pub(crate) abort: AbortSignal,
    pub(crate) cpu: Option<usize>,
}

impl<Dev: DeviceAdaptor + Send + Sync + 'static> ParserWorker<Dev> {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("tsn-parser".into())
            .spawn(move || {
                if let Some(cpu) = self.cpu {
                    pin_to_cpu(cpu);
                }
                info!("parser running");
                while !self.abort.should_abort() {
                    let Some(desc) = self.raw_queue.dequeue() else {
                        std::thread::yield_now();
                        continue;
                    };
                    self.process(desc);
                }
                info!("parser exited");
            })
            .unwrap_or_else(|err| unreachable!("failed to spawn parser thread: {err}"))
    }

    /// Reshapes one received frame; the buffer either moves on to the
    /// parsed queue or goes straight back to the pool.
    #[allow(clippy::cast_possible_truncation)]
    fn process(&self, desc: FrameDesc) {
        let handle = desc.handle;
        let rx_len = desc.len;
        if rx_len == 0 || rx_len > TxFrame::MAX_DATA_LEN {
            bump(&self.stats.tx_filtered);
            self.pool.free(handle);
            return;
        }

        // gPTP replies carry the frame's RX hardware timestamp, not the
        // time the parser got around to it
        let rx_tstamp = self.arena.rx_frame(handle).metadata().map(|m| m.timestamp);
        let now = rx_tstamp.map_or_else(
            || self.clock.gettime().unwrap_or(0),
            |tstamp| self.clock.rx_timestamp(tstamp),
        );
        let mut tx = self.arena.tx_frame(handle);
        let reshaped = packet::reshape(
            tx.data_mut(),
            rx_len,
            self.station_mac,
            &mut self.gptp.lock(),
            now,
        );

        match reshaped {
            Some(tx_len) => {
                // stamp the length stub; the scheduler fills the gate
                // windows at send time
                tx.set_metadata(&TxMetadata {
                    frame_length: tx_len as u16,
                    ..TxMetadata::default()
                });
                let desc = FrameDesc {
                    handle,
                    len: TxFrame::wire_len(tx_len),
                };
                if let Err(desc) = self.parsed_queue.enqueue(desc) {
                    bump(&self.stats.tx_filtered);
                    self.pool.free(desc.handle);
                }
            }
            None => {
                bump(&self.stats.tx_filtered);
                self.pool.free(handle);
            }
        }
    }
}
