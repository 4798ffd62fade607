//! Thin public wrappers so the criterion benches can drive the hot path
//! without the rest of the crate surface becoming public.

use crate::{
    clock::PtpClock,
    csr::{emulated::EmulatedAdaptor, REG_TX_PACKETS},
    mem::{BufHandle, FrameArena},
    metadata::TxMetadata,
    tsn::{QbvEntry, TsnEngine},
};

/// An engine over the emulated register file with one frame loaded.
pub struct FillMetadataBench {
    arena: FrameArena,
    handle: BufHandle,
    dev: EmulatedAdaptor,
    clock: PtpClock<EmulatedAdaptor>,
    engine: TsnEngine<EmulatedAdaptor>,
    now: u64,
}

impl FillMetadataBench {
    /// A VLAN-tagged frame against a two-slot gate schedule.
    #[allow(clippy::missing_panics_doc, clippy::indexing_slicing)]
    #[must_use]
    pub fn new() -> Self {
        let dev = EmulatedAdaptor::new();
        dev.set_sys_clock(0);
        let clock = PtpClock::new(dev.clone(), 0).expect("emulated device cannot fail");
        let mut engine = TsnEngine::new(dev.clone(), false);
        engine
            .set_qbv(
                true,
                0,
                &[
                    QbvEntry {
                        gate_mask: 0xFF,
                        interval_ns: 500_000,
                    },
                    QbvEntry {
                        gate_mask: 0x01,
                        interval_ns: 500_000,
                    },
                ],
            )
            .expect("static schedule is valid");

        let arena = FrameArena::new().expect("arena allocation");
        let handle = BufHandle::new(0).expect("slot 0 exists");
        let mut frame = arena.tx_frame(handle);
        let data = frame.data_mut();
        data[..6].copy_from_slice(&[0xff; 6]);
        data[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        data[12..14].copy_from_slice(&0x8100u16.to_be_bytes());
        data[14] = 5 << 5;
        data[15] = 0x01;
        data[16..18].copy_from_slice(&0x0800u16.to_be_bytes());
        frame.set_metadata(&TxMetadata {
            frame_length: 256,
            ..TxMetadata::default()
        });

        Self {
            arena,
            handle,
            dev,
            clock,
            engine,
            now: 0,
        }
    }

    /// One admission decision on the loaded frame.
    pub fn fill_one(&mut self) -> bool {
        self.now += 10_000;
        // the emulated device "transmits" one frame per call so the
        // occupancy mirror never saturates
        self.dev.set(REG_TX_PACKETS, 1);
        let mut frame = self.arena.tx_frame(self.handle);
        self.engine
            .fill_metadata(&self.clock, self.now, &mut frame)
            .unwrap_or(false)
    }
}

impl Default for FillMetadataBench {
    fn default() -> Self {
        Self::new()
    }
}
