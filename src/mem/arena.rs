use std::{cell::UnsafeCell, io};

use memmap2::MmapMut;

use crate::{
    constants::{
        BUFFER_ADDRESS_MASK, MAX_BUFFER_LENGTH, NUMBER_OF_BUFFER, NUMBER_OF_RESERVED_BUFFER,
    },
    metadata::{RxMetadata, TxMetadata, RX_METADATA_SIZE, TX_METADATA_SIZE},
};

pub(crate) const TOTAL_BUFFERS: usize = NUMBER_OF_BUFFER + NUMBER_OF_RESERVED_BUFFER;

/// Offset of the RX DMA target inside a slot.
///
/// The slot head reserves room for the larger TX header so a received
/// frame can be repurposed for transmit in place: the payload region is
/// shared and only the metadata prefix differs.
pub(crate) const RX_FRAME_OFFSET: usize = TX_METADATA_SIZE - RX_METADATA_SIZE;

/// Which pool a buffer returns to when freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolKind {
    General,
    /// Backs scheduler-originated control frames.
    Reserved,
}

/// Identity of one arena slot.
///
/// The reserved boundary is the index split at `NUMBER_OF_BUFFER`; it is
/// fixed at arena creation and never moves.
///
/// `Default` yields slot 0 and exists only to seed scratch arrays for
/// the multi alloc/dequeue calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufHandle {
    index: u32,
}

impl BufHandle {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn new(index: usize) -> Option<Self> {
        (index < TOTAL_BUFFERS).then_some(Self {
            index: index as u32,
        })
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn kind(self) -> PoolKind {
        if self.index() < NUMBER_OF_BUFFER {
            PoolKind::General
        } else {
            PoolKind::Reserved
        }
    }
}

/// One contiguous, page-aligned allocation backing every frame buffer.
///
/// Slots are accessed through raw handles because they are shared with
/// the DMA engine; exclusivity of a slot is guaranteed by pool
/// ownership, not by the borrow checker: a handle is held by exactly one
/// stage between alloc and free.
#[derive(Debug)]
pub(crate) struct FrameArena {
    storage: UnsafeCell<MmapMut>,
}

#[allow(unsafe_code)]
// Slot exclusivity is handle ownership, see above.
unsafe impl Sync for FrameArena {}

#[allow(unsafe_code)]
impl FrameArena {
    /// Maps the arena. The anonymous mapping is page-aligned, which
    /// keeps every slot aligned for DMA.
    #[allow(clippy::as_conversions)]
    pub(crate) fn new() -> io::Result<Self> {
        let storage = MmapMut::map_anon(TOTAL_BUFFERS * MAX_BUFFER_LENGTH)?;
        debug_assert_eq!(
            storage.as_ptr() as usize % crate::constants::BUFFER_ALIGNMENT,
            0
        );
        Ok(Self {
            storage: UnsafeCell::new(storage),
        })
    }

    #[allow(clippy::as_conversions)]
    fn base_addr(&self) -> u64 {
        unsafe { (*self.storage.get()).as_ptr() as u64 }
    }

    /// Bus address of the slot head (the TX metadata prefix).
    pub(crate) fn slot_addr(&self, handle: BufHandle) -> u64 {
        self.base_addr() + (handle.index() * MAX_BUFFER_LENGTH) as u64
    }

    /// Bus address handed to the device for RX DMA.
    pub(crate) fn rx_dma_addr(&self, handle: BufHandle) -> u64 {
        self.slot_addr(handle) + RX_FRAME_OFFSET as u64
    }

    /// Resolves a device-reported address back to a handle.
    ///
    /// The low 4 bits may carry a device tag and are masked off; any
    /// offset within the slot is accepted.
    pub(crate) fn handle_of(&self, addr: u64) -> Option<BufHandle> {
        let masked = addr & BUFFER_ADDRESS_MASK;
        let rel = masked.checked_sub(self.base_addr())?;
        #[allow(clippy::cast_possible_truncation)]
        BufHandle::new((rel / MAX_BUFFER_LENGTH as u64) as usize)
    }

    /// Raw slot bytes.
    ///
    /// The returned borrow aliases the mapping; callers must hold the
    /// slot's handle.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn slot(&self, handle: BufHandle) -> &mut [u8] {
        let offset = handle.index() * MAX_BUFFER_LENGTH;
        unsafe {
            let ptr = (*self.storage.get()).as_mut_ptr().add(offset);
            std::slice::from_raw_parts_mut(ptr, MAX_BUFFER_LENGTH)
        }
    }

    pub(crate) fn rx_frame(&self, handle: BufHandle) -> RxFrame<'_> {
        RxFrame {
            slot: self.slot(handle),
        }
    }

    pub(crate) fn tx_frame(&self, handle: BufHandle) -> TxFrame<'_> {
        TxFrame {
            slot: self.slot(handle),
        }
    }
}

/// View of a slot as a received frame: 10-byte RX header, then payload.
pub(crate) struct RxFrame<'a> {
    slot: &'a mut [u8],
}

#[allow(clippy::indexing_slicing)]
impl RxFrame<'_> {
    pub(crate) fn metadata(&self) -> Option<RxMetadata> {
        RxMetadata::read_from(&self.slot[RX_FRAME_OFFSET..])
    }

    pub(crate) fn set_metadata(&mut self, metadata: RxMetadata) {
        metadata.write_to(&mut self.slot[RX_FRAME_OFFSET..]);
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.slot[TX_METADATA_SIZE..]
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.slot[TX_METADATA_SIZE..]
    }
}

/// View of the same slot as a transmit frame: 24-byte TX header, then
/// the payload region shared with [`RxFrame`].
pub(crate) struct TxFrame<'a> {
    slot: &'a mut [u8],
}

#[allow(clippy::indexing_slicing)]
impl TxFrame<'_> {
    /// Payload capacity of one slot.
    pub(crate) const MAX_DATA_LEN: usize = MAX_BUFFER_LENGTH - TX_METADATA_SIZE;

    pub(crate) fn metadata(&self) -> Option<TxMetadata> {
        TxMetadata::read_from(self.slot)
    }

    pub(crate) fn set_metadata(&mut self, metadata: &TxMetadata) {
        metadata.write_to(self.slot);
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.slot[TX_METADATA_SIZE..]
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.slot[TX_METADATA_SIZE..]
    }

    /// Bytes that go on the wire for a payload of `frame_length`.
    pub(crate) fn wire_len(frame_length: usize) -> usize {
        TX_METADATA_SIZE + frame_length
    }
}
