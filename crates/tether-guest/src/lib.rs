//! Guest-side collaborator surface for passthrough device construction.
//!
//! [`Guest`] is the view the passthrough layer has of the virtual machine
//! under construction: the declared-valid guest-physical address windows, the
//! MMIO region table, the interrupt-endpoint registry and the secure-call
//! handler slot. The vCPU loop and the full memory-mapping subsystem live
//! elsewhere; only the registration contract is fixed here.

#![forbid(unsafe_code)]

mod ds;
mod guest;
mod region;

pub use ds::{Dataspace, DsHandler};
pub use guest::{Guest, MapError, MmioHandler, SmcHandler, SmcRegs};
pub use region::{GuestAddr, Region};
