use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use tether_irq::{EndpointRegistry, IrqForwarder, RegistryError};

use crate::region::{GuestAddr, Region};

/// An object answering guest memory accesses over a fixed guest-physical
/// address range. Offsets are relative to the region start.
pub trait MmioHandler: Send {
    fn read(&mut self, offset: u64, size: usize) -> u64;
    fn write(&mut self, offset: u64, size: usize, value: u64);
}

/// Register window of a trapped secure-monitor call: seven argument
/// registers in, results written over the first four.
pub type SmcRegs = [u64; 7];

/// Handler for trapped secure-monitor calls.
pub trait SmcHandler: Send + Sync {
    fn handle(&self, regs: &mut SmcRegs);
}

/// Errors registering an MMIO region with the guest address space.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("mmio region at {start} with size {size:#x} is empty or overflows")]
    InvalidRegion { start: GuestAddr, size: u64 },
    #[error("mmio region {region} lies outside the guest's valid address windows")]
    OutsideGuest { region: Region },
    #[error("mmio region {region} overlaps the existing registration {existing}")]
    Overlap { region: Region, existing: Region },
}

struct MmioEntry {
    end: GuestAddr,
    handler: Box<dyn MmioHandler>,
}

/// The virtual machine under construction, as seen by passthrough plumbing.
///
/// Holds the declared-valid guest-physical address windows, the MMIO region
/// table (ranges must lie within the windows and never overlap), the
/// registered interrupt-delivery endpoints and the secure-call handler.
pub struct Guest {
    valid: Vec<Region>,
    mmio: BTreeMap<GuestAddr, MmioEntry>,
    endpoints: Vec<Arc<IrqForwarder>>,
    smc_handler: Option<Arc<dyn SmcHandler>>,
}

impl Guest {
    /// A guest whose addressable space consists of `valid` windows.
    pub fn new(valid: Vec<Region>) -> Self {
        Self {
            valid,
            mmio: BTreeMap::new(),
            endpoints: Vec::new(),
            smc_handler: None,
        }
    }

    /// Whether `[addr, addr + size)` lies within a valid address window.
    pub fn region_valid(&self, addr: GuestAddr, size: u64) -> bool {
        match Region::with_size(addr, size) {
            Some(region) => self.valid.iter().any(|w| w.contains(&region)),
            None => false,
        }
    }

    /// Registers `handler` over `region`.
    ///
    /// The region must lie within the valid windows and must not overlap any
    /// existing registration; a range is never registered twice.
    pub fn add_mmio_region(
        &mut self,
        region: Region,
        handler: Box<dyn MmioHandler>,
    ) -> Result<(), MapError> {
        if !self.valid.iter().any(|w| w.contains(&region)) {
            return Err(MapError::OutsideGuest { region });
        }

        // Check the nearest neighbors on both sides; the map is keyed and
        // ordered by region start.
        if let Some((start, entry)) = self.mmio.range(..=region.start).next_back() {
            if entry.end >= region.start {
                return Err(MapError::Overlap {
                    region,
                    existing: Region::new(*start, entry.end),
                });
            }
        }
        if let Some((start, entry)) = self.mmio.range(region.start..).next() {
            if *start <= region.end {
                return Err(MapError::Overlap {
                    region,
                    existing: Region::new(*start, entry.end),
                });
            }
        }

        tracing::debug!("mmio region {region} registered");
        self.mmio.insert(
            region.start,
            MmioEntry {
                end: region.end,
                handler,
            },
        );
        Ok(())
    }

    pub fn mmio_region_count(&self) -> usize {
        self.mmio.len()
    }

    /// The registered region containing `addr`, if any.
    pub fn mmio_region_at(&self, addr: GuestAddr) -> Option<Region> {
        let (start, entry) = self.mmio.range(..=addr).next_back()?;
        (entry.end >= addr).then(|| Region::new(*start, entry.end))
    }

    /// Routes a guest read to the handler covering `addr`.
    pub fn mmio_read(&mut self, addr: GuestAddr, size: usize) -> Option<u64> {
        let (start, entry) = self.mmio.range_mut(..=addr).next_back()?;
        if entry.end < addr {
            return None;
        }
        Some(entry.handler.read(addr.0 - start.0, size))
    }

    /// Routes a guest write to the handler covering `addr`.
    pub fn mmio_write(&mut self, addr: GuestAddr, size: usize, value: u64) -> bool {
        let Some((start, entry)) = self.mmio.range_mut(..=addr).next_back() else {
            return false;
        };
        if entry.end < addr {
            return false;
        }
        entry.handler.write(addr.0 - start.0, size, value);
        true
    }

    /// Interrupt-delivery endpoints registered so far.
    pub fn irq_endpoints(&self) -> &[Arc<IrqForwarder>] {
        &self.endpoints
    }

    /// Installs the handler receiving trapped secure-monitor calls.
    pub fn register_smc_handler(&mut self, handler: Arc<dyn SmcHandler>) {
        self.smc_handler = Some(handler);
    }

    /// Dispatches a trapped secure-monitor call, if a handler is installed.
    pub fn smc(&self, regs: &mut SmcRegs) -> bool {
        match &self.smc_handler {
            Some(handler) => {
                handler.handle(regs);
                true
            }
            None => false,
        }
    }
}

impl EndpointRegistry for Guest {
    fn register_endpoint(&mut self, endpoint: &Arc<IrqForwarder>) -> Result<(), RegistryError> {
        self.endpoints.push(endpoint.clone());
        Ok(())
    }
}
