use std::{sync::Arc, thread::JoinHandle};

use log::{debug, info, warn};

use crate::{
    constants::{MAX_BD_NUMBER, MAX_BUFFER_LENGTH},
    dma::{DmaChannel, MultiIoctl},
    mem::{BufHandle, FrameArena, FramePool, TxFrame, RX_FRAME_OFFSET},
    queue::{DescQueue, FrameDesc},
    spawner::{pin_to_cpu, AbortSignal},
    stats::{add, bump, Stats},
};

/// Ingress stage: bursts frames from the device into the raw queue.
pub(crate) struct ReceiverWorker<Dma> {
    pub(crate) arena: Arc<FrameArena>,
    pub(crate) pool: Arc<FramePool>,
    pub(crate) raw_queue: Arc<DescQueue>,
    pub(crate) dma: Dma,
    pub(crate) stats: Arc<Stats>,
    pub(crate) abort: AbortSignal,
    pub(crate) cpu: Option<usize>,
}

impl<Dma: DmaChannel + Send + 'static> ReceiverWorker<Dma> {
    pub(crate) fn spawn(mut self) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("tsn-receiver".into())
            .spawn(move || {
                if let Some(cpu) = self.cpu {
                    pin_to_cpu(cpu);
                }
                info!("receiver running");
                while !self.abort.should_abort() {
                    self.run_burst();
                }
                info!("receiver exited");
            })
            .unwrap_or_else(|err| unreachable!("failed to spawn receiver thread: {err}"))
    }

    /// One multi-descriptor read: allocate, receive, validate, enqueue.
    #[allow(clippy::indexing_slicing, clippy::cast_possible_truncation)]
    fn run_burst(&mut self) {
        let mut handles = [BufHandle::default(); MAX_BD_NUMBER];
        let count = self.pool.alloc_multi(&mut handles, MAX_BD_NUMBER);
        if count == 0 {
            bump(&self.stats.rx_no_buffer);
            std::thread::yield_now();
            return;
        }

        let mut io = MultiIoctl::default();
        io.bd_num = count as i32;
        let mut done = 0u64;
        for (bd, handle) in io.bd.iter_mut().zip(&handles).take(count) {
            bd.buffer = self.arena.rx_dma_addr(*handle);
            bd.len = (MAX_BUFFER_LENGTH - RX_FRAME_OFFSET) as u64;
            done += bd.len;
        }
        io.done = done;

        if let Err(err) = self.dma.read_multi(&mut io) {
            debug!("multi read failed: {err}");
            self.pool.free_multi(&handles[..count]);
            bump(&self.stats.rx_errors);
            return;
        }

        for (bd, &handle) in io.bd.iter().zip(&handles).take(count) {
            if bd.len == 0 {
                // descriptor went unused in this burst
                self.pool.free(handle);
                continue;
            }

            let rx = self.arena.rx_frame(handle);
            let frame_length = rx.metadata().map_or(0, |meta| usize::from(meta.frame_length));
            if frame_length == 0 {
                self.pool.free(handle);
                continue;
            }
            if frame_length > TxFrame::MAX_DATA_LEN {
                warn!(
                    "length mismatch: metadata says {frame_length}, slot holds at most {}",
                    TxFrame::MAX_DATA_LEN
                );
                self.pool.free(handle);
                bump(&self.stats.rx_errors);
                continue;
            }

            bump(&self.stats.rx_packets);
            add(&self.stats.rx_bytes, frame_length as u64);

            #[cfg(feature = "debug_frames")]
            super::dump_frame("rx frame", &rx.data()[..frame_length]);

            let desc = FrameDesc {
                handle,
                len: frame_length,
            };
            if let Err(desc) = self.raw_queue.enqueue(desc) {
                self.pool.free(desc.handle);
                bump(&self.stats.rx_drops);
            }
        }
    }
}
