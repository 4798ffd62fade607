//! One value owning every subsystem, handed to the pipeline workers.

use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;
use parking_lot::Mutex;

use crate::{
    clock::PtpClock,
    config::DriverConfig,
    csr::DeviceAdaptor,
    dma::DmaChannel,
    error::Result,
    gptp::GptpEngine,
    mem::{FrameArena, FramePool},
    pipeline::{ParserWorker, ReceiverWorker, SenderWorker},
    queue::DescQueue,
    spawner::AbortSignal,
    stats::{Stats, StatsSnapshot},
    tsn::{MqprioUpdate, QavParams, QbvEntry, TsnEngine},
    tstamp::TstampDispatch,
    types::Timestamp,
};

/// The driver core: arena, pools, queues, clock, scheduler and stats.
///
/// All shared state lives here; workers receive `Arc` clones and nothing
/// else is global.
pub struct Runtime<Dev> {
    arena: Arc<FrameArena>,
    pool: Arc<FramePool>,
    raw_queue: Arc<DescQueue>,
    parsed_queue: Arc<DescQueue>,
    clock: Arc<PtpClock<Dev>>,
    engine: Arc<Mutex<TsnEngine<Dev>>>,
    gptp: Arc<Mutex<GptpEngine>>,
    stats: Arc<Stats>,
    config: DriverConfig,
    dev: Dev,
}

impl<Dev: DeviceAdaptor + Clone + Send + Sync + 'static> Runtime<Dev> {
    /// Builds the runtime and steps the device clock to host time.
    pub fn new(dev: Dev, config: DriverConfig) -> Result<Self> {
        let host_now = host_nanos();
        let clock = Arc::new(PtpClock::new(dev.clone(), host_now)?);
        let engine = Arc::new(Mutex::new(TsnEngine::new(dev.clone(), config.hw_tstamp)));
        let gptp = Arc::new(Mutex::new(GptpEngine::new(config.mac, true)));

        Ok(Self {
            arena: Arc::new(FrameArena::new()?),
            pool: Arc::new(FramePool::new()),
            raw_queue: Arc::new(DescQueue::new()),
            parsed_queue: Arc::new(DescQueue::new()),
            clock,
            engine,
            gptp,
            stats: Arc::new(Stats::default()),
            config,
            dev,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current PTP time.
    pub fn gettime(&self) -> Result<Timestamp> {
        Ok(self.clock.gettime()?)
    }

    /// Steps the PTP clock.
    pub fn settime(&self, host_timestamp: Timestamp) -> Result<()> {
        Ok(self.clock.settime(host_timestamp)?)
    }

    /// Shifts the PTP clock by a signed delta.
    pub fn adjtime(&self, delta: i64) -> Result<()> {
        Ok(self.clock.adjtime(delta)?)
    }

    /// Adjusts the PTP cycle scale in scaled parts per million.
    pub fn adjfine(&self, scaled_ppm: i64) -> Result<()> {
        Ok(self.clock.adjfine(scaled_ppm)?)
    }

    /// Applies an mqprio mapping update.
    pub fn set_mqprio(&self, update: &MqprioUpdate) -> Result<()> {
        self.engine.lock().set_mqprio(update)
    }

    /// Applies a credit-based shaper update.
    pub fn set_qav(&self, queue: usize, params: QavParams) -> Result<()> {
        self.engine.lock().set_qav(queue, params)
    }

    /// Replaces or destroys the gate schedule.
    pub fn set_qbv(&self, enable: bool, base_time: Timestamp, entries: &[QbvEntry]) -> Result<()> {
        self.engine.lock().set_qbv(enable, base_time, entries)
    }

    /// Spawns the pipeline over the given DMA channels.
    pub fn start<R, W>(&self, rx_dma: R, tx_dma: W) -> PipelineHandle
    where
        R: DmaChannel + Send + 'static,
        W: DmaChannel + Send + 'static,
    {
        let abort = AbortSignal::new();

        let mut tstamp_reports = None;
        let tstamp = self.config.hw_tstamp.then(|| {
            let (dispatch, reports) = TstampDispatch::spawn(
                self.dev.clone(),
                Arc::clone(&self.clock),
                &abort,
            );
            tstamp_reports = Some(reports);
            Arc::new(dispatch)
        });

        let receiver = ReceiverWorker {
            arena: Arc::clone(&self.arena),
            pool: Arc::clone(&self.pool),
            raw_queue: Arc::clone(&self.raw_queue),
            dma: rx_dma,
            stats: Arc::clone(&self.stats),
            abort: abort.clone(),
            cpu: self.config.cpus.receiver,
        };
        let parser = ParserWorker {
            arena: Arc::clone(&self.arena),
            pool: Arc::clone(&self.pool),
            raw_queue: Arc::clone(&self.raw_queue),
            parsed_queue: Arc::clone(&self.parsed_queue),
            clock: Arc::clone(&self.clock),
            gptp: Arc::clone(&self.gptp),
            stats: Arc::clone(&self.stats),
            station_mac: self.config.mac,
            abort: abort.clone(),
            cpu: self.config.cpus.parser,
        };
        let sender = SenderWorker {
            arena: Arc::clone(&self.arena),
            pool: Arc::clone(&self.pool),
            parsed_queue: Arc::clone(&self.parsed_queue),
            dma: tx_dma,
            engine: Arc::clone(&self.engine),
            clock: Arc::clone(&self.clock),
            gptp: Arc::clone(&self.gptp),
            tstamp,
            stats: Arc::clone(&self.stats),
            mode: self.config.mode,
            abort: abort.clone(),
            cpu: self.config.cpus.sender,
        };

        PipelineHandle {
            abort,
            threads: vec![receiver.spawn(), parser.spawn(), sender.spawn()],
            pool: Arc::clone(&self.pool),
            raw_queue: Arc::clone(&self.raw_queue),
            parsed_queue: Arc::clone(&self.parsed_queue),
            tstamp_reports,
        }
    }

    pub fn hw_tstamp_enabled(&self) -> bool {
        self.config.hw_tstamp
    }
}

/// Running pipeline. Shutdown is cooperative: workers observe the abort
/// flag at their next loop iteration and drain what they own.
pub struct PipelineHandle {
    abort: AbortSignal,
    threads: Vec<JoinHandle<()>>,
    pool: Arc<FramePool>,
    raw_queue: Arc<DescQueue>,
    parsed_queue: Arc<DescQueue>,
    /// Keeps the timestamp report channel alive for the workers.
    tstamp_reports: Option<flume::Receiver<crate::tstamp::TstampReport>>,
}

impl PipelineHandle {
    /// Stops the workers and returns in-queue buffers to the pool.
    pub fn shutdown(self) {
        drop(self.tstamp_reports);
        self.abort.abort();
        for thread in self.threads {
            if thread.join().is_err() {
                warn!("pipeline worker panicked");
            }
        }
        self.raw_queue.drain_with(|desc| self.pool.free(desc.handle));
        self.parsed_queue
            .drain_with(|desc| self.pool.free(desc.handle));
    }
}

fn host_nanos() -> Timestamp {
    #[allow(clippy::cast_possible_truncation)]
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64)
}
