use std::{sync::Arc, thread::JoinHandle};

use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    clock::PtpClock,
    config::RunMode,
    constants::{GPTP_PERIOD_NS, MAX_BD_NUMBER},
    csr::DeviceAdaptor,
    dma::{BufferDesc, DmaChannel, MultiIoctl},
    gptp::GptpEngine,
    mem::{BufHandle, FrameArena, FramePool, TxFrame},
    metadata::{FailPolicy, TxMetadata},
    queue::{DescQueue, FrameDesc},
    spawner::{pin_to_cpu, AbortSignal},
    stats::{add, bump, Stats},
    tsn::TsnEngine,
    tstamp::{widen_tick, TstampDispatch, TstampJob},
    types::Timestamp,
};

/// How many parsed descriptors one TSN-mode loop iteration may drain.
const TSN_DRAIN_BUDGET: usize = 16;

/// Egress stage: drains the parsed queue into multi-descriptor writes,
/// scheduling each frame through the TSN engine, and originates the
/// periodic gPTP burst.
pub(crate) struct SenderWorker<Dev, Dma> {
    pub(crate) arena: Arc<FrameArena>,
    pub(crate) pool: Arc<FramePool>,
    pub(crate) parsed_queue: Arc<DescQueue>,
    pub(crate) dma: Dma,
    pub(crate) engine: Arc<Mutex<TsnEngine<Dev>>>,
    pub(crate) clock: Arc<PtpClock<Dev>>,
    pub(crate) gptp: Arc<Mutex<GptpEngine>>,
    pub(crate) tstamp: Option<Arc<TstampDispatch>>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) mode: RunMode,
    pub(crate) abort: AbortSignal,
    pub(crate) cpu: Option<usize>,
}

impl<Dev, Dma> SenderWorker<Dev, Dma>
where
    Dev: DeviceAdaptor + Send + Sync + 'static,
    Dma: DmaChannel + Send + 'static,
{
    pub(crate) fn spawn(mut self) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("tsn-sender".into())
            .spawn(move || {
                if let Some(cpu) = self.cpu {
                    pin_to_cpu(cpu);
                }
                info!("sender running in {:?} mode", self.mode);
                let mut last_gptp: Timestamp = 0;
                while !self.abort.should_abort() {
                    match self.mode {
                        RunMode::Tsn => self.run_tsn(&mut last_gptp),
                        RunMode::Normal => self.run_normal(),
                    }
                }
                info!("sender exited");
            })
            .unwrap_or_else(|err| unreachable!("failed to spawn sender thread: {err}"))
    }

    fn run_tsn(&mut self, last_gptp: &mut Timestamp) {
        let now = self.clock.gettime().unwrap_or(0);
        if now.wrapping_sub(*last_gptp) > GPTP_PERIOD_NS {
            self.periodic_gptp(now);
            *last_gptp = now;
        }

        let mut budget = self.parsed_queue.len().min(TSN_DRAIN_BUDGET);
        let mut descs = [FrameDesc::default(); MAX_BD_NUMBER];
        let mut drained = false;
        while budget > 0 {
            let n = self
                .parsed_queue
                .dequeue_multi(&mut descs, budget.min(MAX_BD_NUMBER));
            if n == 0 {
                break;
            }
            drained = true;
            #[allow(clippy::indexing_slicing)]
            self.send_burst(&descs[..n], true);
            budget -= n;
        }
        if !drained {
            std::thread::yield_now();
        }
    }

    fn run_normal(&mut self) {
        let mut descs = [FrameDesc::default(); MAX_BD_NUMBER];
        let n = self.parsed_queue.dequeue_multi(&mut descs, MAX_BD_NUMBER);
        if n == 0 {
            std::thread::yield_now();
            return;
        }
        #[allow(clippy::indexing_slicing)]
        self.send_burst(&descs[..n], false);
    }

    /// Emits the periodic gPTP control frames from the reserved pool.
    #[allow(clippy::cast_possible_truncation)]
    fn periodic_gptp(&mut self, now: Timestamp) {
        for step in 0..4u8 {
            let Some(handle) = self.pool.alloc_reserved() else {
                debug!("no reserved buffer for gptp frame");
                return;
            };
            let mut frame = self.arena.tx_frame(handle);
            let len = {
                let mut gptp = self.gptp.lock();
                match step {
                    0 => gptp.make_pdelay_req(&mut frame),
                    1 => gptp.make_announce(&mut frame, now),
                    2 => gptp.make_sync(&mut frame, now),
                    _ => gptp.make_follow_up(&mut frame),
                }
            };
            if len == 0 {
                // not a master, nothing to announce
                self.pool.free(handle);
                continue;
            }
            frame.set_metadata(&TxMetadata {
                frame_length: len as u16,
                ..TxMetadata::default()
            });
            let desc = FrameDesc {
                handle,
                len: TxFrame::wire_len(len),
            };
            if let Err(desc) = self.parsed_queue.enqueue(desc) {
                bump(&self.stats.tx_filtered);
                self.pool.free(desc.handle);
            }
        }
    }

    /// Schedules (in TSN mode) and writes one burst, then returns every
    /// buffer to its pool.
    #[allow(clippy::indexing_slicing, clippy::cast_possible_truncation)]
    fn send_burst(&mut self, descs: &[FrameDesc], fill: bool) {
        let mut io = MultiIoctl::default();
        let mut kept = [BufHandle::default(); MAX_BD_NUMBER];
        let mut kept_count = 0;
        let mut done = 0u64;

        for desc in descs {
            if fill && !self.schedule_frame(*desc) {
                bump(&self.stats.tx_errors);
                self.pool.free(desc.handle);
                continue;
            }
            #[cfg(feature = "debug_frames")]
            super::dump_frame("tx frame", &self.arena.slot(desc.handle)[..desc.len]);
            io.bd[kept_count] = BufferDesc {
                buffer: self.arena.slot_addr(desc.handle),
                len: desc.len as u64,
            };
            kept[kept_count] = desc.handle;
            kept_count += 1;
            done += desc.len as u64;
        }
        if kept_count == 0 {
            return;
        }
        io.bd_num = kept_count as i32;
        io.done = done;

        match self.dma.write_multi(&mut io) {
            Err(err) => {
                debug!("multi write failed: {err}");
                add(&self.stats.tx_errors, kept_count as u64);
            }
            Ok(()) => {
                for bd in io.descriptors() {
                    if bd.len > 0 {
                        bump(&self.stats.tx_packets);
                        add(&self.stats.tx_bytes, bd.len);
                    } else {
                        bump(&self.stats.tx_errors);
                    }
                }
            }
        }
        self.pool.free_multi(&kept[..kept_count]);
    }

    /// Runs one frame through the metadata filler and, when requested,
    /// arms the TX timestamp worker for it.
    fn schedule_frame(&mut self, desc: FrameDesc) -> bool {
        let mut frame = self.arena.tx_frame(desc.handle);
        let now = match self.clock.gettime() {
            Ok(now) => now,
            Err(_) => return false,
        };
        match self.engine.lock().fill_metadata(&self.clock, now, &mut frame) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                debug!("fill_metadata failed: {err}");
                return false;
            }
        }

        if let Some(dispatch) = &self.tstamp {
            let Some(meta) = frame.metadata() else {
                return true;
            };
            if let Some(id) = meta.timestamp_id.register() {
                if let Ok(sys_count) = self.clock.sysclock() {
                    let job = tstamp_window(sys_count, &meta);
                    let _ = dispatch.submit(id, job);
                }
            }
        }
        true
    }
}

/// Widens the frame's 29-bit gate edges into the sys-clock window the
/// timestamp worker polls within.
fn tstamp_window(sys_count: u64, meta: &TxMetadata) -> TstampJob {
    let to_tick = if meta.fail_policy == FailPolicy::Retry {
        meta.delay_to.tick_value()
    } else {
        meta.to.tick_value()
    };
    TstampJob {
        start_after: widen_tick(sys_count, meta.from.tick_value()),
        wait_until: widen_tick(sys_count, to_tick),
    }
}
