//! Multi-descriptor DMA transfers over the XDMA character devices.

use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::Path,
};

use bytemuck::{Pod, Zeroable};
use nix::ioctl_readwrite;

use crate::constants::MAX_BD_NUMBER;

/// One buffer of a multi-descriptor transfer.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub(crate) struct BufferDesc {
    /// Bus address of the buffer.
    pub(crate) buffer: u64,
    /// Capacity on read, valid bytes on completion/write.
    pub(crate) len: u64,
}

/// Argument block of the `MULTI_READ`/`MULTI_WRITE` ioctls.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct MultiIoctl {
    pub(crate) bd_num: i32,
    pub(crate) error: i32,
    /// Cumulative byte count, set by the caller and updated by the
    /// engine on completion.
    pub(crate) done: u64,
    pub(crate) bd: [BufferDesc; MAX_BD_NUMBER],
}

impl Default for MultiIoctl {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl MultiIoctl {
    /// Descriptors holding valid entries.
    #[allow(clippy::indexing_slicing, clippy::cast_sign_loss)]
    pub(crate) fn descriptors(&self) -> &[BufferDesc] {
        let count = (self.bd_num.max(0) as usize).min(MAX_BD_NUMBER);
        &self.bd[..count]
    }
}

const XDMA_IOC_MAGIC: u8 = b'q';
const XDMA_IOC_MULTI_READ: u8 = 19;
const XDMA_IOC_MULTI_WRITE: u8 = 20;

ioctl_readwrite!(xdma_multi_read, XDMA_IOC_MAGIC, XDMA_IOC_MULTI_READ, MultiIoctl);
ioctl_readwrite!(xdma_multi_write, XDMA_IOC_MAGIC, XDMA_IOC_MULTI_WRITE, MultiIoctl);

/// A direction of the DMA engine capable of multi-descriptor bursts.
pub trait DmaChannel {
    /// Blocks until the engine filled the descriptors with received
    /// frames (or reported an error).
    fn read_multi(&self, io: &mut MultiIoctl) -> io::Result<()>;

    /// Blocks until the engine consumed the descriptors.
    fn write_multi(&self, io: &mut MultiIoctl) -> io::Result<()>;
}

/// One XDMA character device (C2H or H2C).
#[derive(Debug)]
pub struct XdmaChannel {
    file: File,
}

impl XdmaChannel {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

#[allow(unsafe_code)]
impl DmaChannel for XdmaChannel {
    fn read_multi(&self, io: &mut MultiIoctl) -> io::Result<()> {
        unsafe {
            let _ = xdma_multi_read(self.file.as_raw_fd(), io)?;
        }
        if io.error != 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "multi read failed"));
        }
        Ok(())
    }

    fn write_multi(&self, io: &mut MultiIoctl) -> io::Result<()> {
        unsafe {
            let _ = xdma_multi_write(self.file.as_raw_fd(), io)?;
        }
        if io.error != 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "multi write failed"));
        }
        Ok(())
    }
}
