use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tether_guest::{Dataspace, DsHandler, Guest, GuestAddr, MapError, Region};
use tether_irq::PhysicalIcu;

use crate::icu::BusIcu;
use crate::resource::{Resource, ResourceKind};

/// Handle on a claimed device's I/O capability.
///
/// Cheap to clone; the proxy device keeps one for the guest's lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoCap {
    device: Arc<str>,
}

impl IoCap {
    pub fn device_name(&self) -> &str {
        &self.device
    }
}

/// A physical-bus device offered for passthrough.
pub struct PhysicalDevice {
    name: String,
    hid: String,
    resources: Vec<Resource>,
    assigned: bool,
}

impl PhysicalDevice {
    pub fn new(
        name: impl Into<String>,
        hid: impl Into<String>,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            name: name.into(),
            hid: hid.into(),
            resources,
            assigned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hid(&self) -> &str {
        &self.hid
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Whether a proxy has claimed this device.
    pub fn assigned(&self) -> bool {
        self.assigned
    }
}

/// The virtual hardware bus handed to guest construction.
///
/// Tracks which devices are claimed and which interrupt lines are consumed;
/// both sets only ever grow and are discarded with the guest process.
pub struct VirtBus {
    devices: Vec<PhysicalDevice>,
    /// Interrupt lines present on the bus, `true` once consumed.
    lines: BTreeMap<u32, bool>,
    icu: Arc<BusIcu>,
    io_ds: Arc<dyn Dataspace>,
}

impl VirtBus {
    pub fn new(devices: Vec<PhysicalDevice>, io_ds: Arc<dyn Dataspace>) -> Self {
        let lines: BTreeSet<u32> = devices
            .iter()
            .flat_map(|d| d.resources.iter())
            .filter(|r| r.kind == ResourceKind::Interrupt)
            .map(|r| r.start as u32)
            .collect();

        Self {
            lines: lines.iter().map(|&l| (l, false)).collect(),
            icu: Arc::new(BusIcu::new(lines)),
            devices,
            io_ds,
        }
    }

    /// Finds the device with hardware id `hid` that no proxy has claimed.
    pub fn find_unassigned(&self, hid: &str) -> Option<usize> {
        self.devices
            .iter()
            .position(|d| !d.assigned && d.hid == hid)
    }

    pub fn device(&self, index: usize) -> &PhysicalDevice {
        &self.devices[index]
    }

    /// Claims `index` for a proxy, permanently, and hands out its I/O
    /// capability.
    pub fn claim(&mut self, index: usize) -> IoCap {
        let device = &mut self.devices[index];
        debug_assert!(!device.assigned);
        device.assigned = true;
        IoCap {
            device: device.name.as_str().into(),
        }
    }

    /// Whether `line` exists on the bus and has not been consumed.
    pub fn line_present(&self, line: u32) -> bool {
        self.lines.get(&line) == Some(&false)
    }

    /// Marks `line` consumed by a binding.
    pub fn consume_line(&mut self, line: u32) {
        if let Some(consumed) = self.lines.get_mut(&line) {
            *consumed = true;
        }
    }

    pub fn icu(&self) -> Arc<dyn PhysicalIcu> {
        self.icu.clone()
    }

    /// The controller object itself, for delivering out-of-band interrupts.
    pub fn bus_icu(&self) -> &Arc<BusIcu> {
        &self.icu
    }

    /// Dataspace backing every memory resource on the bus.
    pub fn io_ds(&self) -> Arc<dyn Dataspace> {
        self.io_ds.clone()
    }

    /// Bulk resource preparation: identity-maps every memory resource of
    /// every device into the guest address space.
    ///
    /// Runs once per guest, ahead of generic passthrough node creation.
    pub fn prepare(&self, guest: &mut Guest) -> Result<(), MapError> {
        for device in &self.devices {
            for res in &device.resources {
                if res.kind != ResourceKind::Memory {
                    continue;
                }
                let region = Region::with_size(GuestAddr(res.start), res.size()).ok_or(
                    MapError::InvalidRegion {
                        start: GuestAddr(res.start),
                        size: res.size(),
                    },
                )?;
                tracing::debug!("pre-mapping {}.{} at {region}", device.name, res.name);
                guest.add_mmio_region(
                    region,
                    Box::new(DsHandler::new(self.io_ds.clone(), res.start)),
                )?;
            }
        }
        Ok(())
    }
}
