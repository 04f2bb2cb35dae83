use std::sync::Arc;

use tether_irq::VirtualIc;

use crate::{DtNode, IrqParent, IrqSpec, IrqSpecError, IrqTrigger, RegEntry, RegError};

/// A statically described node.
///
/// Useful where no flattened tree backs the configuration: synthetic nodes
/// assembled by the launcher, and tests. Entries are stored pre-resolved,
/// including translation outcomes such as [`RegError::NotTranslatable`].
#[derive(Default)]
pub struct StaticNode {
    name: String,
    device_id: Option<String>,
    regs: Vec<Result<RegEntry, RegError>>,
    irqs: Vec<Result<IrqSpec, IrqSpecError>>,
}

impl StaticNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the hardware-id property selecting a named physical device.
    pub fn with_device_id(mut self, hid: impl Into<String>) -> Self {
        self.device_id = Some(hid.into());
        self
    }

    /// Appends a translated `reg` entry.
    pub fn with_reg(mut self, addr: u64, size: u64) -> Self {
        self.regs.push(Ok(RegEntry { addr, size }));
        self
    }

    /// Appends a `reg` entry with a non-success translation outcome.
    pub fn with_reg_outcome(mut self, outcome: RegError) -> Self {
        self.regs.push(Err(outcome));
        self
    }

    /// Appends an interrupt routed through a virtual controller.
    pub fn with_virtual_irq(mut self, ic: Arc<dyn VirtualIc>, line: u32, trigger: IrqTrigger) -> Self {
        self.irqs.push(Ok(IrqSpec {
            parent: IrqParent::Virtual(ic),
            line,
            trigger,
        }));
        self
    }

    /// Appends an interrupt whose parent is outside this guest.
    pub fn with_foreign_irq(mut self, line: u32, trigger: IrqTrigger) -> Self {
        self.irqs.push(Ok(IrqSpec {
            parent: IrqParent::Foreign,
            line,
            trigger,
        }));
        self
    }

    /// Appends an interrupt entry with a non-success resolution outcome.
    pub fn with_irq_outcome(mut self, outcome: IrqSpecError) -> Self {
        self.irqs.push(Err(outcome));
        self
    }
}

impl DtNode for StaticNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn has_reg(&self) -> bool {
        !self.regs.is_empty()
    }

    fn reg_entry(&self, index: usize) -> Result<RegEntry, RegError> {
        self.regs.get(index).copied().unwrap_or(Err(RegError::BadIndex))
    }

    fn has_interrupts(&self) -> bool {
        !self.irqs.is_empty()
    }

    fn interrupt(&self, index: usize) -> Result<IrqSpec, IrqSpecError> {
        self.irqs
            .get(index)
            .cloned()
            .unwrap_or(Err(IrqSpecError::OutOfRange))
    }
}
