//! DMA-safe frame buffers: one contiguous arena split into fixed-size
//! slots, handed around as typed handles by two bounded LIFO pools.

mod arena;
mod pool;

pub(crate) use arena::{BufHandle, FrameArena, PoolKind, RxFrame, TxFrame, RX_FRAME_OFFSET};
pub(crate) use pool::FramePool;
