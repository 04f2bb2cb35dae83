use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tether_irq::{IcuError, IrqForwarder, PhysicalIcu};

/// The bus's interrupt controller: the kernel-level object physical lines
/// are bound on.
///
/// Bindings are 1:1 and permanent; [`BusIcu::raise`] models the out-of-band
/// notification path from hardware to the bound endpoint.
pub struct BusIcu {
    lines: BTreeSet<u32>,
    bound: Mutex<BTreeMap<u32, Arc<IrqForwarder>>>,
}

impl BusIcu {
    pub(crate) fn new(lines: BTreeSet<u32>) -> Self {
        Self {
            lines,
            bound: Mutex::new(BTreeMap::new()),
        }
    }

    /// Delivers a physical interrupt on `io_line` to its bound endpoint.
    ///
    /// Returns whether an endpoint was notified.
    pub fn raise(&self, io_line: u32) -> bool {
        let endpoint = self.bound.lock().unwrap().get(&io_line).cloned();
        match endpoint {
            Some(endpoint) => {
                endpoint.notify();
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self, io_line: u32) -> bool {
        self.bound.lock().unwrap().contains_key(&io_line)
    }
}

impl PhysicalIcu for BusIcu {
    fn bind(&self, io_line: u32, endpoint: Arc<IrqForwarder>) -> Result<(), IcuError> {
        if !self.lines.contains(&io_line) {
            return Err(IcuError::UnknownLine(io_line));
        }
        let mut bound = self.bound.lock().unwrap();
        if bound.contains_key(&io_line) {
            return Err(IcuError::AlreadyBound(io_line));
        }
        bound.insert(io_line, endpoint);
        Ok(())
    }

    fn ack(&self, io_line: u32) {
        // Unmasking happens at the kernel object; nothing to track here.
        tracing::trace!("physical line {io_line:#x} acknowledged");
    }
}
