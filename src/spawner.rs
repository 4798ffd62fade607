//! Worker thread plumbing: cooperative shutdown and a single-thread
//! task worker for event-driven jobs.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{error, info};

/// Cooperative shutdown flag shared by every pipeline worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortSignal {
    inner: Arc<AtomicBool>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn should_abort(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }

    pub(crate) fn abort(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }
}

/// A worker that owns one thread and processes tasks sent to it.
pub(crate) trait SingleThreadTaskWorker {
    type Task;

    fn process(&mut self, task: Self::Task);

    fn spawn(mut self, name: &str, abort: AbortSignal) -> TaskTx<Self::Task>
    where
        Self: Sized + Send + 'static,
        Self::Task: Send + 'static,
    {
        let name = name.to_owned();
        let (tx, rx) = flume::unbounded::<Self::Task>();
        let _handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!("worker {name} running");
                loop {
                    if abort.should_abort() {
                        break;
                    }
                    match rx.recv_timeout(std::time::Duration::from_millis(50)) {
                        Ok(task) => self.process(task),
                        Err(flume::RecvTimeoutError::Timeout) => {}
                        Err(flume::RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("worker {name} exited");
            })
            .expect("failed to spawn worker");

        TaskTx { inner: tx }
    }
}

/// Handle for submitting tasks to a spawned worker.
pub(crate) struct TaskTx<T> {
    inner: flume::Sender<T>,
}

impl<T> TaskTx<T> {
    pub(crate) fn send(&self, task: T) {
        if self.inner.send(task).is_err() {
            error!("failed to send task to worker");
        }
    }
}

impl<T> Clone for TaskTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Pins the calling thread to `cpu`. Failure is logged, not fatal.
#[allow(unsafe_code)]
pub(crate) fn pin_to_cpu(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            error!("failed to pin thread to cpu {cpu}");
        }
    }
}
