use thiserror::Error;

use tether_dt::{IrqSpecError, RegError};
use tether_guest::{GuestAddr, MapError};
use tether_irq::BindError;
use tether_vbus::ResourceName;

/// Everything that can go wrong creating a passthrough device for one node.
///
/// Fatal errors abort construction of the whole guest: the system cannot
/// safely run with a half-configured interrupt route or memory map.
/// Non-fatal errors are absorbed per node by the construction driver; the
/// affected node simply produces no device.
#[derive(Debug, PartialEq, Error)]
pub enum CreateError {
    #[error("node '{node}': invalid reg property: {source}")]
    BadRegProperty { node: String, source: RegError },

    #[error("node '{node}': invalid interrupt property: {source}")]
    BadIrqProperty { node: String, source: IrqSpecError },

    #[error("node '{node}': interrupt parent of line {line} is not a virtual controller")]
    ForeignInterruptParent { node: String, line: u32 },

    #[error(
        "node '{node}': resource '{name}' size {resource:#x} does not match \
         reg entry size {declared:#x}"
    )]
    SizeMismatch {
        node: String,
        name: ResourceName,
        resource: u64,
        declared: u64,
    },

    #[error("node '{node}': resource '{name}' has no matching device-tree entry")]
    UnmatchedSlot { node: String, name: ResourceName },

    #[error(
        "node '{node}': {regs} reg and {irqs} interrupt entries have no \
         matching bus resource"
    )]
    UnmatchedEntries {
        node: String,
        regs: usize,
        irqs: usize,
    },

    #[error("node '{node}': {source}")]
    Bind { node: String, source: BindError },

    #[error("node '{node}': {source}")]
    Mmio { node: String, source: MapError },

    #[error("node '{node}': physical-bus device '{hid}' is not available")]
    DeviceUnavailable { node: String, hid: String },

    #[error("node '{node}': interrupt line {line:#x} is not available on the bus")]
    LineUnavailable { node: String, line: u32 },

    #[error(
        "node '{node}': reg entry {index} at {addr}+{size:#x} lies outside \
         the guest's valid address windows"
    )]
    RegOutsideGuest {
        node: String,
        index: usize,
        addr: GuestAddr,
        size: u64,
    },

    #[error("node '{node}': reg entry {index} exceeds the translatable range")]
    RegTooLarge { node: String, index: usize },

    #[error("node '{node}': generic passthrough requested before bus preparation")]
    OrderingViolation { node: String },

    #[error("node '{node}': secure-world service unavailable: {reason}")]
    SecureWorldUnavailable { node: String, reason: &'static str },
}

impl CreateError {
    /// Whether this error must abort construction of the whole guest.
    ///
    /// Non-fatal kinds mean optional hardware is absent or a single node is
    /// misconfigured in a way that only affects itself; the driver logs and
    /// moves on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CreateError::DeviceUnavailable { .. }
                | CreateError::LineUnavailable { .. }
                | CreateError::RegOutsideGuest { .. }
                | CreateError::RegTooLarge { .. }
                | CreateError::OrderingViolation { .. }
                | CreateError::SecureWorldUnavailable { .. }
        )
    }
}
