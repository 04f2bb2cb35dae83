//! Interrupt routing between physical interrupt lines and a guest's virtual
//! interrupt controller.
//!
//! The central object is the [`IrqForwarder`]: an endpoint that owns the
//! binding to one physical line and relays delivery upstream to a
//! [`VirtualIc`] line and end-of-interrupt acknowledgement back downstream.
//! [`bind_line`] is the only way such a forwarder comes into existence; it
//! creates-or-validates the binding so that repeated requests for the same
//! guest line are safe.

#![forbid(unsafe_code)]

mod bind;
mod forwarder;
mod source;

pub use bind::{bind_line, BindError};
pub use forwarder::IrqForwarder;
pub use source::{EndpointRegistry, IcuError, IrqSource, PhysicalIcu, RegistryError, VirtualIc};
