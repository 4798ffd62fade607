//! The burst pipeline: receiver, parser and sender stages connected by
//! the raw and parsed descriptor queues.
//!
//! Frame lifecycle: pool, RX DMA, raw queue, parser, parsed queue,
//! TX DMA, back to the pool. Every stage owns the buffers it holds and
//! returns them on any failure.

mod parser;
mod receiver;
mod sender;

pub(crate) use parser::ParserWorker;
pub(crate) use receiver::ReceiverWorker;
pub(crate) use sender::SenderWorker;

/// Hex dump of the head of a frame, for bring-up debugging.
#[cfg(feature = "debug_frames")]
pub(crate) fn dump_frame(label: &str, data: &[u8]) {
    use std::fmt::Write as _;

    let mut dump = String::new();
    for chunk in data.chunks(16).take(4) {
        for byte in chunk {
            let _ = write!(dump, "{byte:02x} ");
        }
        dump.push('\n');
    }
    log::debug!("{label} ({} bytes)\n{dump}", data.len());
}
