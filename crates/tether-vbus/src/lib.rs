//! The virtual hardware bus: physical devices whose pre-validated resources
//! are available for passthrough to a guest.
//!
//! The bus enumerates [`PhysicalDevice`]s once; each carries an ordered list
//! of typed, named resource slots following the `reg<N>`/`irq<N>` naming
//! convention. A device can be claimed by at most one proxy for the guest's
//! lifetime, and every interrupt line can be consumed at most once.

#![forbid(unsafe_code)]

mod bus;
mod icu;
mod resource;

pub use bus::{IoCap, PhysicalDevice, VirtBus};
pub use icu::BusIcu;
pub use resource::{Resource, ResourceKind, ResourceName};
