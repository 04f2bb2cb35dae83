//! Device-tree driven hardware passthrough for a guest VM.
//!
//! Facade over the workspace crates: the virtual hardware bus
//! ([`vbus`]), the guest collaborator surface ([`guest`]), interrupt
//! routing ([`irq`]), the device-tree node contract ([`dt`]) and the
//! passthrough device factory ([`passthrough`]).

#![forbid(unsafe_code)]

pub use tether_dt as dt;
pub use tether_guest as guest;
pub use tether_irq as irq;
pub use tether_passthrough as passthrough;
pub use tether_vbus as vbus;
