#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tether_guest::{Dataspace, Guest, GuestAddr, Region};
use tether_irq::{IrqSource, VirtualIc};
use tether_vbus::{PhysicalDevice, Resource, ResourceName, VirtBus};

/// Virtual interrupt controller double: a plain line-to-source table that
/// records raised lines.
#[derive(Default)]
pub struct MockIc {
    sources: Mutex<BTreeMap<u32, Arc<dyn IrqSource>>>,
    pub raised: Mutex<Vec<u32>>,
}

impl MockIc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The physical line forwarded into `line`, if a forwarder is bound.
    pub fn forwarded_line(&self, line: u32) -> Option<u32> {
        self.sources
            .lock()
            .unwrap()
            .get(&line)
            .and_then(|s| s.forwarded_line())
    }

    pub fn has_source(&self, line: u32) -> bool {
        self.sources.lock().unwrap().contains_key(&line)
    }
}

impl VirtualIc for MockIc {
    fn source(&self, line: u32) -> Option<Arc<dyn IrqSource>> {
        self.sources.lock().unwrap().get(&line).cloned()
    }

    fn bind_source(&self, line: u32, source: Arc<dyn IrqSource>) {
        self.sources.lock().unwrap().insert(line, source);
    }

    fn raise(&self, line: u32) {
        self.raised.lock().unwrap().push(line);
    }
}

/// Byte-vector dataspace with little-endian value access.
pub struct VecDataspace {
    data: Mutex<Vec<u8>>,
}

impl VecDataspace {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0u8; size]),
        })
    }
}

impl Dataspace for VecDataspace {
    fn size(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn read(&self, offset: u64, size: usize) -> u64 {
        let data = self.data.lock().unwrap();
        let mut value = 0u64;
        for i in (0..size.min(8)).rev() {
            value = (value << 8) | data[offset as usize + i] as u64;
        }
        value
    }

    fn write(&self, offset: u64, size: usize, value: u64) {
        let mut data = self.data.lock().unwrap();
        for i in 0..size.min(8) {
            data[offset as usize + i] = (value >> (8 * i)) as u8;
        }
    }
}

/// A guest addressable up to 256 MiB.
pub fn guest() -> Guest {
    Guest::new(vec![Region::with_size(GuestAddr(0), 0x1000_0000).unwrap()])
}

/// A UART-shaped device: one 4 KiB memory window at `base`, one interrupt
/// line.
pub fn uart_device(name: &str, hid: &str, base: u64, line: u32) -> PhysicalDevice {
    PhysicalDevice::new(
        name,
        hid,
        vec![
            Resource::memory(ResourceName::reg(0), base, base + 0xfff),
            Resource::interrupt(ResourceName::irq(0), line),
        ],
    )
}

/// Bus over a 128 KiB I/O dataspace; device windows must stay below that.
pub fn bus_with(devices: Vec<PhysicalDevice>) -> VirtBus {
    VirtBus::new(devices, VecDataspace::new(0x2_0000))
}
