use std::sync::Arc;

use thiserror::Error;

use crate::forwarder::IrqForwarder;

/// An object currently answering for one line of a virtual interrupt
/// controller.
///
/// Sources are compared by identity (`Arc::ptr_eq`); the controller keeps at
/// most one source per line and never replaces it silently.
pub trait IrqSource: Send + Sync {
    /// The physical line wrapped by this source, when it forwards one.
    ///
    /// Sources that do not forward a physical line (purely virtual devices
    /// raising their own interrupts) return `None`.
    fn forwarded_line(&self) -> Option<u32> {
        None
    }

    /// Guest end-of-interrupt for the line this source feeds.
    fn eoi(&self);
}

/// The guest-facing side of a virtual interrupt controller.
///
/// The controller's own delivery logic (priorities, masking, vCPU targeting)
/// is not modeled here; passthrough plumbing only needs to look up and bind
/// per-line sources and to raise a line on behalf of a physical interrupt.
pub trait VirtualIc: Send + Sync {
    /// The source currently bound to `line`, if any.
    fn source(&self, line: u32) -> Option<Arc<dyn IrqSource>>;

    /// Makes `source` the downstream source for `line`.
    ///
    /// Callers must check [`VirtualIc::source`] first; the passthrough layer
    /// never rebinds a line that already has a source.
    fn bind_source(&self, line: u32, source: Arc<dyn IrqSource>);

    /// Marks `line` pending for the guest.
    fn raise(&self, line: u32);
}

/// Errors reported by a physical interrupt controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IcuError {
    #[error("physical line {0:#x} is not present on this controller")]
    UnknownLine(u32),
    #[error("physical line {0:#x} is already bound to an endpoint")]
    AlreadyBound(u32),
}

/// The physical interrupt controller behind the hardware bus.
///
/// Lines bind 1:1: a previously unbound line must bind cleanly, and a second
/// bind of the same line fails rather than stealing the registration.
pub trait PhysicalIcu: Send + Sync {
    fn bind(&self, io_line: u32, endpoint: Arc<IrqForwarder>) -> Result<(), IcuError>;

    /// Acknowledges `io_line` so the hardware may deliver the next interrupt.
    fn ack(&self, io_line: u32);
}

/// Failure to register an interrupt-delivery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot register interrupt-delivery endpoint: {0}")]
pub struct RegistryError(pub &'static str);

/// Registry accepting interrupt-delivery endpoints on behalf of the guest.
///
/// Registration hands the endpoint to whatever dispatches out-of-band
/// notifications; an endpoint must stay registered for the guest's lifetime.
pub trait EndpointRegistry {
    fn register_endpoint(&mut self, endpoint: &Arc<IrqForwarder>) -> Result<(), RegistryError>;
}
