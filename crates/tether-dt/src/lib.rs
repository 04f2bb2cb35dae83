//! The device-tree node contract consumed by passthrough device creation.
//!
//! Parsing the flattened tree is someone else's job; this crate fixes the
//! operations required of a parsed node: lazily translated `reg` entries,
//! an iterator over resolved interrupt specifiers, and the hardware-id
//! property selecting a named physical-bus device.

#![forbid(unsafe_code)]

mod static_node;

pub use static_node::StaticNode;

use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use tether_irq::VirtualIc;

/// A `reg` entry translated to a guest-physical range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegEntry {
    pub addr: u64,
    pub size: u64,
}

/// Outcomes of resolving a `reg` entry.
///
/// [`RegError::BadIndex`] is the end-of-list sentinel, not a defect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RegError {
    #[error("no reg entry at this index")]
    BadIndex,
    #[error("reg entry does not translate to a guest address")]
    NotTranslatable,
    #[error("reg entry exceeds the translatable range")]
    AddressRange,
    #[error("malformed reg property: {0}")]
    Malformed(&'static str),
}

bitflags! {
    /// Trigger flags of an interrupt specifier.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqTrigger: u32 {
        const EDGE_RISING = 1 << 0;
        const EDGE_FALLING = 1 << 1;
        const LEVEL_HIGH = 1 << 2;
        const LEVEL_LOW = 1 << 3;
    }
}

/// The resolved interrupt parent of a specifier.
#[derive(Clone)]
pub enum IrqParent {
    /// A virtual interrupt controller emulated for this guest.
    Virtual(Arc<dyn VirtualIc>),
    /// A controller outside this guest's emulation (no binding happens).
    Foreign,
}

impl core::fmt::Debug for IrqParent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IrqParent::Virtual(_) => f.write_str("Virtual"),
            IrqParent::Foreign => f.write_str("Foreign"),
        }
    }
}

/// One resolved interrupt specifier.
#[derive(Clone, Debug)]
pub struct IrqSpec {
    pub parent: IrqParent,
    pub line: u32,
    pub trigger: IrqTrigger,
}

impl IrqSpec {
    pub fn virtual_parent(&self) -> Option<&Arc<dyn VirtualIc>> {
        match &self.parent {
            IrqParent::Virtual(ic) => Some(ic),
            IrqParent::Foreign => None,
        }
    }
}

/// Outcomes of resolving an interrupt specifier.
///
/// [`IrqSpecError::OutOfRange`] is the end-of-list sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum IrqSpecError {
    #[error("no interrupt entry at this index")]
    OutOfRange,
    #[error("the interrupt parent cannot be resolved")]
    UnresolvedParent,
    #[error("malformed interrupt specifier: {0}")]
    Malformed(&'static str),
}

/// A parsed device-tree node, as consumed by device creation.
pub trait DtNode {
    fn name(&self) -> &str;

    /// Hardware-id property selecting a named physical-bus device.
    fn device_id(&self) -> Option<&str>;

    /// Whether the node declares a `reg` property at all.
    fn has_reg(&self) -> bool;

    /// Resolves the `index`-th `reg` entry through address translation.
    fn reg_entry(&self, index: usize) -> Result<RegEntry, RegError>;

    /// Whether the node declares interrupts at all.
    fn has_interrupts(&self) -> bool;

    /// Resolves the `index`-th interrupt specifier.
    ///
    /// Most callers should walk [`DtNode::interrupts`] instead.
    fn interrupt(&self, index: usize) -> Result<IrqSpec, IrqSpecError>;

    /// A fresh walk over the node's interrupt specifiers.
    fn interrupts(&self) -> IrqLines<'_>
    where
        Self: Sized,
    {
        IrqLines::new(self)
    }
}

/// Walks a node's ordered interrupt list, one resolved specifier per step.
pub struct IrqLines<'a> {
    node: &'a dyn DtNode,
    index: usize,
}

impl<'a> IrqLines<'a> {
    pub fn new(node: &'a dyn DtNode) -> Self {
        Self { node, index: 0 }
    }

    /// Resolves the next specifier; [`IrqSpecError::OutOfRange`] past the
    /// end.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<IrqSpec, IrqSpecError> {
        let index = self.index;
        self.index += 1;
        self.node.interrupt(index)
    }
}
