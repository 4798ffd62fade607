use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::{fs::OpenOptions, io, path::Path, sync::Arc};

use super::DeviceAdaptor;

const BAR_INDEX: usize = 0;

/// BAR0 register access through the PCI sysfs resource file.
#[derive(Clone, Debug)]
pub struct SysfsBarAdaptor {
    bar: Arc<Mutex<MmapMut>>,
}

#[allow(unsafe_code)]
impl SysfsBarAdaptor {
    pub fn open(sysfs_path: impl AsRef<Path>) -> io::Result<Self> {
        let bar_path = sysfs_path.as_ref().join(format!("resource{BAR_INDEX}"));
        let file = OpenOptions::new().read(true).write(true).open(&bar_path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(Self {
            bar: Arc::new(Mutex::new(mmap)),
        })
    }
}

#[allow(unsafe_code, clippy::cast_ptr_alignment)]
impl DeviceAdaptor for SysfsBarAdaptor {
    fn read_csr(&self, addr: usize) -> io::Result<u32> {
        if addr % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unaligned access",
            ));
        }

        let bar = self.bar.lock();
        if addr >= bar.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "out of range"));
        }
        unsafe {
            let ptr = bar.as_ptr().add(addr);
            Ok(ptr.cast::<u32>().read_volatile())
        }
    }

    fn write_csr(&self, addr: usize, data: u32) -> io::Result<()> {
        if addr % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unaligned access",
            ));
        }

        let mut bar = self.bar.lock();
        if addr >= bar.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "out of range"));
        }
        unsafe {
            let ptr = bar.as_mut_ptr().add(addr);
            ptr.cast::<u32>().write_volatile(data);
        }

        Ok(())
    }
}
