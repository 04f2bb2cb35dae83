use tether_dt::DtNode;
use tether_guest::{Guest, MapError};
use tether_vbus::{IoCap, VirtBus};

use crate::error::CreateError;
use crate::matcher::create_from_bus_device;
use crate::scan::{validate_and_bind_lines, validate_reg_windows};

/// A created passthrough device.
///
/// Named-path proxies own the I/O capability of the physical device they
/// claimed; generic-path proxies have no capability of their own because the
/// preparation pass already mapped the hardware.
#[derive(Debug)]
pub struct ProxyDevice {
    io: Option<IoCap>,
}

impl ProxyDevice {
    pub(crate) fn named(io: IoCap) -> Self {
        Self { io: Some(io) }
    }

    pub(crate) fn anonymous() -> Self {
        Self { io: None }
    }

    pub fn io(&self) -> Option<&IoCap> {
        self.io.as_ref()
    }
}

/// Construction-time state threaded through every device creation call.
///
/// Carrying the preparation flag here, instead of in process-wide mutable
/// state, lets creation be triggered from more than one code path while the
/// ordering precondition stays checkable.
pub struct SetupCtx<'a> {
    pub guest: &'a mut Guest,
    pub bus: &'a mut VirtBus,
    prepared: bool,
}

impl<'a> SetupCtx<'a> {
    pub fn new(guest: &'a mut Guest, bus: &'a mut VirtBus) -> Self {
        Self {
            guest,
            bus,
            prepared: false,
        }
    }

    /// One-time bulk preparation: pre-maps all physical-bus resources into
    /// the guest address space. Idempotent.
    pub fn prepare(&mut self) -> Result<(), MapError> {
        if self.prepared {
            return Ok(());
        }
        self.bus.prepare(self.guest)?;
        self.prepared = true;
        Ok(())
    }

    pub fn prepared(&self) -> bool {
        self.prepared
    }
}

/// Creates the passthrough proxy for `node`.
///
/// A node naming a physical device takes the named path; everything else
/// takes the generic path, which requires the bulk preparation pass to have
/// run first.
pub fn create_proxy(ctx: &mut SetupCtx<'_>, node: &dyn DtNode) -> Result<ProxyDevice, CreateError> {
    if let Some(hid) = node.device_id() {
        return create_from_bus_device(ctx.guest, ctx.bus, node, hid);
    }

    if !ctx.prepared() {
        tracing::error!(
            "node '{}': generic passthrough requested before bus preparation, \
             probably an invalid device tree",
            node.name()
        );
        return Err(CreateError::OrderingViolation {
            node: node.name().into(),
        });
    }

    // Memory windows were pre-mapped by the preparation pass; check that the
    // node's view of them is sane, then bind its interrupt lines.
    validate_reg_windows(node, ctx.guest)?;
    validate_and_bind_lines(ctx.guest, ctx.bus, node)?;

    Ok(ProxyDevice::anonymous())
}

/// Walks `nodes` in order, creating one proxy per node.
///
/// Non-fatal failures (absent optional hardware, a node-local
/// misconfiguration) are logged and skipped; fatal ones abort the walk and
/// with it the guest's construction.
pub fn build_devices<'n, I>(
    ctx: &mut SetupCtx<'_>,
    nodes: I,
) -> Result<Vec<ProxyDevice>, CreateError>
where
    I: IntoIterator<Item = &'n dyn DtNode>,
{
    let mut devices = Vec::new();
    for node in nodes {
        match create_proxy(ctx, node) {
            Ok(proxy) => devices.push(proxy),
            Err(err) if !err.is_fatal() => {
                tracing::warn!("{err}; continuing without this device");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(devices)
}
