//! TX timestamp retrieval, one worker per hardware timestamp register.
//!
//! The device latches the egress sys-clock of a timestamped frame into
//! one of four register pairs. Reading races the hardware update, so a
//! worker polls until the value changes and looks fresh, bounded by the
//! frame's own gate window and a retry cap.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{error, warn};

use crate::{
    clock::PtpClock,
    constants::{TX_TSTAMP_MAX_RETRY, TX_TSTAMP_UPDATE_THRESHOLD, TX_WORK_OVERFLOW_MARGIN},
    csr::{self, DeviceAdaptor},
    metadata::{TICK_BITS, TICK_MASK},
    spawner::{AbortSignal, SingleThreadTaskWorker, TaskTx},
    types::{Sysclock, Timestamp},
};

const POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Number of hardware TX timestamp registers.
pub(crate) const TX_TSTAMP_IDS: usize = 4;

/// Widens a 29-bit gate tick into a full sys-clock value near
/// `sys_count`.
///
/// The tick may be slightly behind the observed clock because of the
/// sysclock/timestamp conversions; only a gap beyond the margin means
/// the tick belongs to the next 29-bit epoch.
pub(crate) fn widen_tick(sys_count: Sysclock, tick: u32) -> Sysclock {
    let lower = sys_count & TICK_MASK;
    let upper = sys_count & !TICK_MASK;
    let tick = u64::from(tick);
    let mut value = upper | tick;
    if lower > tick && lower - tick > TX_WORK_OVERFLOW_MARGIN {
        value += 1 << TICK_BITS;
    }
    value
}

/// One outstanding timestamp request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TstampJob {
    /// The frame cannot have left before its gate opened.
    pub(crate) start_after: Sysclock,
    /// Past the end of its window the frame is gone either way.
    pub(crate) wait_until: Sysclock,
}

/// A retrieved TX timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TstampReport {
    pub(crate) id: u8,
    pub(crate) timestamp: Timestamp,
}

/// Polls one TX timestamp register.
pub(crate) struct TstampWorker<Dev> {
    id: u8,
    dev: Dev,
    clock: Arc<PtpClock<Dev>>,
    in_progress: Arc<AtomicBool>,
    last_tstamp: Sysclock,
    report_tx: flume::Sender<TstampReport>,
}

impl<Dev: DeviceAdaptor + Send + 'static> SingleThreadTaskWorker for TstampWorker<Dev> {
    type Task = TstampJob;

    fn process(&mut self, job: TstampJob) {
        let mut retry = 0u32;
        loop {
            let Ok(now) = self.clock.sysclock() else {
                error!("tx timestamp {}: failed to read sys clock", self.id);
                break;
            };
            if now < job.start_after {
                spin_sleep::sleep(POLL_INTERVAL);
                continue;
            }
            let Ok(tstamp) = csr::read_tx_timestamp(&self.dev, self.id) else {
                error!("tx timestamp {}: failed to read register", self.id);
                break;
            };
            if tstamp == self.last_tstamp {
                if now < job.wait_until {
                    // the frame might not have been sent yet
                    spin_sleep::sleep(POLL_INTERVAL);
                    continue;
                }
                retry += 1;
                if retry >= TX_TSTAMP_MAX_RETRY {
                    warn!(
                        "tx timestamp {}: register is not getting updated, \
                         the packet might have been dropped",
                        self.id
                    );
                    break;
                }
                spin_sleep::sleep(POLL_INTERVAL);
                continue;
            }
            if now.wrapping_sub(tstamp) > TX_TSTAMP_UPDATE_THRESHOLD {
                // reading raced the hardware, only half the pair is new
                retry += 1;
                if retry >= TX_TSTAMP_MAX_RETRY {
                    error!("tx timestamp {}: register only partially updated", self.id);
                    break;
                }
                spin_sleep::sleep(POLL_INTERVAL);
                continue;
            }

            self.last_tstamp = tstamp;
            let report = TstampReport {
                id: self.id,
                timestamp: self.clock.sysclock_to_tx_timestamp(tstamp),
            };
            if self.report_tx.send(report).is_err() {
                warn!("tx timestamp {}: report receiver is gone", self.id);
            }
            break;
        }
        self.in_progress.store(false, Ordering::Release);
    }
}

/// Submission front end for the four workers.
pub(crate) struct TstampDispatch {
    in_progress: [Arc<AtomicBool>; TX_TSTAMP_IDS],
    jobs: [TaskTx<TstampJob>; TX_TSTAMP_IDS],
}

impl TstampDispatch {
    /// Spawns the four per-register workers.
    pub(crate) fn spawn<Dev: DeviceAdaptor + Clone + Send + Sync + 'static>(
        dev: Dev,
        clock: Arc<PtpClock<Dev>>,
        abort: &AbortSignal,
    ) -> (Self, flume::Receiver<TstampReport>) {
        let (report_tx, report_rx) = flume::unbounded();
        let in_progress: [Arc<AtomicBool>; TX_TSTAMP_IDS] = std::array::from_fn(|_| Arc::default());
        let jobs = std::array::from_fn(|idx| {
            #[allow(clippy::cast_possible_truncation, clippy::indexing_slicing)]
            let worker = TstampWorker {
                id: idx as u8 + 1,
                dev: dev.clone(),
                clock: Arc::clone(&clock),
                in_progress: Arc::clone(&in_progress[idx]),
                last_tstamp: 0,
                report_tx: report_tx.clone(),
            };
            worker.spawn(&format!("tx-tstamp-{}", idx + 1), abort.clone())
        });
        (Self { in_progress, jobs }, report_rx)
    }

    /// Hands a job to the worker for `id` (1..=4) unless it is still
    /// busy with the previous frame's timestamp.
    #[allow(clippy::indexing_slicing)]
    pub(crate) fn submit(&self, id: u8, job: TstampJob) -> bool {
        let Some(idx) = (usize::from(id)).checked_sub(1).filter(|&i| i < TX_TSTAMP_IDS) else {
            return false;
        };
        if self.in_progress[idx].swap(true, Ordering::AcqRel) {
            warn!("timestamp skipped: still waiting for the previous packet's timestamp");
            return false;
        }
        self.jobs[idx].send(job);
        true
    }
}
