//! Bounded FIFO of frame descriptors connecting the pipeline stages.

use parking_lot::Mutex;

use crate::{
    constants::{MAX_BD_NUMBER, QUEUE_CAPACITY},
    mem::BufHandle,
};

/// A buffer and the number of valid bytes in it.
///
/// `Default` only seeds scratch arrays for the multi dequeue calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameDesc {
    pub(crate) handle: BufHandle,
    pub(crate) len: usize,
}

struct Ring {
    slots: Box<[Option<FrameDesc>]>,
    front: usize,
    count: usize,
}

impl Ring {
    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    #[allow(clippy::indexing_slicing)]
    fn push(&mut self, desc: FrameDesc) {
        let rear = (self.front + self.count) % self.slots.len();
        self.slots[rear] = Some(desc);
        self.count += 1;
    }

    #[allow(clippy::indexing_slicing)]
    fn pop(&mut self) -> Option<FrameDesc> {
        if self.is_empty() {
            return None;
        }
        let desc = self.slots[self.front].take();
        self.front = (self.front + 1) % self.slots.len();
        self.count -= 1;
        desc
    }
}

/// Fixed-capacity descriptor queue. Ordering is FIFO; there is no
/// priority inside a queue.
pub(crate) struct DescQueue {
    inner: Mutex<Ring>,
}

impl DescQueue {
    pub(crate) fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                slots: vec![None; capacity].into_boxed_slice(),
                front: 0,
                count: 0,
            }),
        }
    }

    /// Appends one descriptor; hands it back when the queue is full.
    pub(crate) fn enqueue(&self, desc: FrameDesc) -> Result<(), FrameDesc> {
        let mut ring = self.inner.lock();
        if ring.is_full() {
            return Err(desc);
        }
        ring.push(desc);
        Ok(())
    }

    pub(crate) fn dequeue(&self) -> Option<FrameDesc> {
        self.inner.lock().pop()
    }

    /// Appends a burst, stopping at the first descriptor that does not
    /// fit. Returns how many were accepted.
    pub(crate) fn enqueue_multi(&self, descs: &[FrameDesc]) -> usize {
        let mut ring = self.inner.lock();
        let mut accepted = 0;
        for &desc in descs {
            if ring.is_full() {
                break;
            }
            ring.push(desc);
            accepted += 1;
        }
        accepted
    }

    /// Pops up to `max` descriptors (capped at `MAX_BD_NUMBER`) into
    /// `out`. A short read means the queue drained mid-burst.
    #[allow(clippy::indexing_slicing)]
    pub(crate) fn dequeue_multi(&self, out: &mut [FrameDesc; MAX_BD_NUMBER], max: usize) -> usize {
        let mut ring = self.inner.lock();
        let mut count = 0;
        while count < max.min(MAX_BD_NUMBER) {
            let Some(desc) = ring.pop() else { break };
            out[count] = desc;
            count += 1;
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().count
    }

    /// Empties the queue, handing every descriptor to `f`. Used by
    /// shutdown to return in-queue buffers to the pool.
    pub(crate) fn drain_with(&self, mut f: impl FnMut(FrameDesc)) {
        let mut ring = self.inner.lock();
        while let Some(desc) = ring.pop() {
            f(desc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(index: usize, len: usize) -> FrameDesc {
        FrameDesc {
            handle: BufHandle::new(index).unwrap(),
            len,
        }
    }

    #[test]
    fn fifo_ordering() {
        let queue = DescQueue::with_capacity(4);
        queue.enqueue(desc(0, 10)).unwrap();
        queue.enqueue(desc(1, 20)).unwrap();
        queue.enqueue(desc(2, 30)).unwrap();
        assert_eq!(queue.dequeue(), Some(desc(0, 10)));
        assert_eq!(queue.dequeue(), Some(desc(1, 20)));
        assert_eq!(queue.dequeue(), Some(desc(2, 30)));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn full_queue_rejects_and_returns_descriptor() {
        let queue = DescQueue::with_capacity(2);
        queue.enqueue(desc(0, 1)).unwrap();
        queue.enqueue(desc(1, 1)).unwrap();
        let rejected = queue.enqueue(desc(2, 1)).unwrap_err();
        assert_eq!(rejected, desc(2, 1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn wraparound_keeps_order() {
        let queue = DescQueue::with_capacity(3);
        for round in 0..10 {
            queue.enqueue(desc(round % 3, round)).unwrap();
            assert_eq!(queue.dequeue(), Some(desc(round % 3, round)));
        }
    }

    #[test]
    fn multi_dequeue_returns_short_read() {
        let queue = DescQueue::with_capacity(16);
        for i in 0..3 {
            queue.enqueue(desc(i, i)).unwrap();
        }
        let mut out = [desc(0, 0); MAX_BD_NUMBER];
        let n = queue.dequeue_multi(&mut out, MAX_BD_NUMBER);
        assert_eq!(n, 3);
        assert_eq!(out[..n].to_vec(), vec![desc(0, 0), desc(1, 1), desc(2, 2)]);
        assert_eq!(queue.dequeue_multi(&mut out, MAX_BD_NUMBER), 0);
    }

    #[test]
    fn multi_enqueue_stops_at_capacity() {
        let queue = DescQueue::with_capacity(2);
        let batch = [desc(0, 0), desc(1, 1), desc(2, 2)];
        assert_eq!(queue.enqueue_multi(&batch), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_hands_back_every_descriptor() {
        let queue = DescQueue::with_capacity(8);
        for i in 0..5 {
            queue.enqueue(desc(i, i)).unwrap();
        }
        let mut drained = Vec::new();
        queue.drain_with(|d| drained.push(d));
        assert_eq!(drained.len(), 5);
        assert_eq!(queue.len(), 0);
    }
}
