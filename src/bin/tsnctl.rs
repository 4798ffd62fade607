//! Dumps the gate engine's clock and transmit counters from BAR0.

use std::env;

use tsn_nic_driver::{DeviceAdaptor, SysfsBarAdaptor};

const REG_CYCLE_1S: usize = 0x0034;
const REG_SYS_CLOCK_HI: usize = 0x0380;
const REG_SYS_CLOCK_LO: usize = 0x0384;
const REG_TX_PACKETS: usize = 0x0200;
const REG_TX_DROP_PACKETS: usize = 0x0220;
const REG_NORMAL_TIMEOUT_COUNT: usize = 0x041c;
const REG_TO_OVERFLOW_POPPED_COUNT: usize = 0x0420;
const REG_TO_OVERFLOW_TIMEOUT_COUNT: usize = 0x0424;
const REG_TX_TIMESTAMP_BASE: usize = 0x0310;

const DEFAULT_SYSFS_PATH: &str = "/sys/bus/pci/devices/0000:01:00.0";

fn dump(dev: &SysfsBarAdaptor) -> std::io::Result<()> {
    let hi = dev.read_csr(REG_SYS_CLOCK_HI)?;
    let lo = dev.read_csr(REG_SYS_CLOCK_LO)?;
    let sys_clock = u64::from(hi) << 32 | u64::from(lo);

    println!("sys clock:        {sys_clock}");
    println!("cycle 1s:         {}", dev.read_csr(REG_CYCLE_1S)?);
    println!("tx packets:       {}", dev.read_csr(REG_TX_PACKETS)?);
    println!("tx drops:         {}", dev.read_csr(REG_TX_DROP_PACKETS)?);
    println!(
        "normal timeouts:  {}",
        dev.read_csr(REG_NORMAL_TIMEOUT_COUNT)?
    );
    println!(
        "overflow popped:  {}",
        dev.read_csr(REG_TO_OVERFLOW_POPPED_COUNT)?
    );
    println!(
        "overflow timeout: {}",
        dev.read_csr(REG_TO_OVERFLOW_TIMEOUT_COUNT)?
    );

    for id in 0..4usize {
        let base = REG_TX_TIMESTAMP_BASE + 0x10 * id;
        let hi = dev.read_csr(base)?;
        let lo = dev.read_csr(base + 4)?;
        let tstamp = u64::from(hi) << 32 | u64::from(lo);
        println!("tx timestamp {}:   {tstamp}", id + 1);
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let sysfs_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SYSFS_PATH.to_owned());

    let dev = match SysfsBarAdaptor::open(&sysfs_path) {
        Ok(dev) => dev,
        Err(err) => {
            eprintln!("failed to open {sysfs_path}: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = dump(&dev) {
        eprintln!("register read failed: {err}");
        std::process::exit(1);
    }
}
