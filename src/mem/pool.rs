use log::error;
use parking_lot::Mutex;

use crate::constants::{MAX_BD_NUMBER, NUMBER_OF_BUFFER, NUMBER_OF_RESERVED_BUFFER};

use super::{BufHandle, PoolKind};

/// Two bounded LIFO pools over the frame arena.
///
/// The general pool feeds the RX path; the reserved pool feeds
/// scheduler-originated control frames so RX pressure can never starve
/// them. A freed handle routes itself by its index.
#[derive(Debug)]
pub(crate) struct FramePool {
    general: Mutex<Vec<BufHandle>>,
    reserved: Mutex<Vec<BufHandle>>,
}

impl FramePool {
    /// Creates the pools holding every arena slot.
    pub(crate) fn new() -> Self {
        let general = (0..NUMBER_OF_BUFFER)
            .filter_map(BufHandle::new)
            .collect::<Vec<_>>();
        let reserved = (NUMBER_OF_BUFFER..NUMBER_OF_BUFFER + NUMBER_OF_RESERVED_BUFFER)
            .filter_map(BufHandle::new)
            .collect::<Vec<_>>();
        Self {
            general: Mutex::new(general),
            reserved: Mutex::new(reserved),
        }
    }

    /// Pops a general buffer, or `None` when the pool is drained.
    pub(crate) fn alloc(&self) -> Option<BufHandle> {
        self.general.lock().pop()
    }

    /// Pops a reserved buffer, or `None` when the pool is drained.
    pub(crate) fn alloc_reserved(&self) -> Option<BufHandle> {
        self.reserved.lock().pop()
    }

    /// Returns a buffer to the pool its index belongs to.
    pub(crate) fn free(&self, handle: BufHandle) {
        match handle.kind() {
            PoolKind::General => Self::push_checked(&mut self.general.lock(), handle, NUMBER_OF_BUFFER),
            PoolKind::Reserved => {
                Self::push_checked(&mut self.reserved.lock(), handle, NUMBER_OF_RESERVED_BUFFER);
            }
        }
    }

    /// Pops up to `max` general buffers in one critical section.
    pub(crate) fn alloc_multi(&self, out: &mut [BufHandle; MAX_BD_NUMBER], max: usize) -> usize {
        let mut general = self.general.lock();
        let mut count = 0;
        while count < max.min(MAX_BD_NUMBER) {
            let Some(handle) = general.pop() else { break };
            out[count] = handle;
            count += 1;
        }
        count
    }

    /// Releases a burst of buffers, each to its own pool.
    ///
    /// Lock order is reserved before general, same as every other paired
    /// acquisition.
    pub(crate) fn free_multi(&self, handles: &[BufHandle]) {
        let mut reserved = self.reserved.lock();
        let mut general = self.general.lock();
        for &handle in handles {
            match handle.kind() {
                PoolKind::General => Self::push_checked(&mut general, handle, NUMBER_OF_BUFFER),
                PoolKind::Reserved => {
                    Self::push_checked(&mut reserved, handle, NUMBER_OF_RESERVED_BUFFER);
                }
            }
        }
    }

    fn push_checked(stack: &mut Vec<BufHandle>, handle: BufHandle, capacity: usize) {
        if stack.len() >= capacity {
            error!("pool is full, dropping buffer {}", handle.index());
            return;
        }
        stack.push(handle);
    }

    pub(crate) fn general_len(&self) -> usize {
        self.general.lock().len()
    }

    pub(crate) fn reserved_len(&self) -> usize {
        self.reserved.lock().len()
    }
}
