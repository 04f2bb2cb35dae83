//! Secure-call passthrough: forwards trapped secure-monitor calls to a
//! secure-world service and maps its statically advertised shared memory.

use std::sync::Arc;

use tether_dt::{DtNode, IrqLines, IrqSpecError};
use tether_guest::{Dataspace, DsHandler, Guest, GuestAddr, Region, SmcHandler, SmcRegs};
use tether_irq::{bind_line, PhysicalIcu};

use crate::error::CreateError;

/// Result registers of a completed secure-monitor call.
pub type SmcResult = [u64; 4];

/// Capability to a secure-world operating environment.
pub trait SecureMonitor: Send + Sync {
    /// Issues a call with seven argument registers, yielding four results.
    fn call(&self, regs: SmcRegs) -> SmcResult;

    /// Dataspace through which the service's static shared memory is
    /// reachable, addressed by physical address.
    fn shared_memory(&self) -> Option<Arc<dyn Dataspace>> {
        None
    }

    /// Notification interrupt controller, present when a proxy capable of
    /// signalling the guest backs the service.
    fn notify_icu(&self) -> Option<Arc<dyn PhysicalIcu>> {
        None
    }
}

// Secure-OS message protocol: identity, version and shared-memory discovery.
const CALL_TRUSTED_OS_UID: u64 = 0xbf00_ff01;
const CALL_TRUSTED_OS_REVISION: u64 = 0xbf00_ff03;
const CALL_GET_SHM_CONFIG: u64 = 0xb200_0007;
const CALL_EXCHANGE_CAPABILITIES: u64 = 0xb200_0009;

const TRUSTED_OS_UID: SmcResult = [0x384f_b3e0, 0xe7f8_11e3, 0xaf63_0002, 0xa5d5_c51b];
const API_MAJOR: u64 = 2;
const API_MINOR: u64 = 0;
/// Capability flag announcing a reserved static shared-memory region.
const CAP_SHARED_MEMORY: u64 = 1 << 0;

/// The secure-call passthrough device.
pub struct SmcProxy {
    monitor: Arc<dyn SecureMonitor>,
}

impl std::fmt::Debug for SmcProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmcProxy").finish_non_exhaustive()
    }
}

impl SmcProxy {
    fn fast_call(&self, func: u64) -> SmcResult {
        self.monitor.call([func, 0, 0, 0, 0, 0, 0])
    }

    /// Runs the capability handshake and maps the advertised shared-memory
    /// region into the guest address space.
    fn map_shared_memory(&self, guest: &mut Guest, node: &str) -> Result<(), CreateError> {
        let unavailable = |reason| CreateError::SecureWorldUnavailable {
            node: node.into(),
            reason,
        };

        let uid = self.fast_call(CALL_TRUSTED_OS_UID);
        if uid != TRUSTED_OS_UID {
            tracing::warn!("node '{node}': secure OS not running");
            return Err(unavailable("secure OS not running"));
        }

        let rev = self.fast_call(CALL_TRUSTED_OS_REVISION);
        if rev[0] != API_MAJOR || rev[1] != API_MINOR {
            tracing::warn!(
                "node '{node}': secure OS API {}.{} unsupported, need {API_MAJOR}.{API_MINOR}",
                rev[0],
                rev[1]
            );
            return Err(unavailable("unsupported secure OS API version"));
        }

        let caps = self.fast_call(CALL_EXCHANGE_CAPABILITIES);
        if caps[0] != 0 || caps[1] & CAP_SHARED_MEMORY == 0 {
            tracing::warn!("node '{node}': secure OS exports no shared memory");
            return Err(unavailable("no exported shared memory"));
        }

        let shm = self.fast_call(CALL_GET_SHM_CONFIG);
        if shm[0] != 0 {
            tracing::warn!("node '{node}': shared memory configuration unavailable");
            return Err(unavailable("shared memory configuration unavailable"));
        }
        let (base, size) = (shm[1], shm[2]);

        let Some(ds) = self.monitor.shared_memory() else {
            tracing::warn!("node '{node}': no dataspace provider for shared memory");
            return Err(unavailable("no dataspace provider for shared memory"));
        };
        let region = Region::with_size(GuestAddr(base), size)
            .ok_or_else(|| unavailable("broken shared memory geometry"))?;

        tracing::debug!("node '{node}': secure shared memory at {region}");
        guest
            .add_mmio_region(region, Box::new(DsHandler::new(ds, base)))
            .map_err(|source| CreateError::Mmio {
                node: node.into(),
                source,
            })
    }
}

impl SmcHandler for SmcProxy {
    fn handle(&self, regs: &mut SmcRegs) {
        let result = self.monitor.call(*regs);
        regs[..4].copy_from_slice(&result);
    }
}

/// Creates the secure-call passthrough device for `node` and installs it as
/// the guest's secure-call handler.
///
/// The shared-memory handshake must succeed for the device to exist; any
/// failed step is non-fatal and only means the guest runs without it. A
/// declared notification interrupt is routed through the line binding
/// protocol when the service exposes a notification controller, and
/// tolerated otherwise.
pub fn create_smc_proxy(
    guest: &mut Guest,
    node: &dyn DtNode,
    monitor: Arc<dyn SecureMonitor>,
) -> Result<Arc<SmcProxy>, CreateError> {
    tracing::info!("node '{}': creating secure-call passthrough device", node.name());

    let proxy = Arc::new(SmcProxy { monitor });
    proxy.map_shared_memory(guest, node.name())?;

    match IrqLines::new(node).next() {
        Ok(spec) => match proxy.monitor.notify_icu() {
            Some(icu) => {
                let Some(ic) = spec.virtual_parent() else {
                    return Err(CreateError::ForeignInterruptParent {
                        node: node.name().into(),
                        line: spec.line,
                    });
                };
                bind_line(guest, &icu, ic, spec.line, 0, node.name()).map_err(|source| {
                    CreateError::Bind {
                        node: node.name().into(),
                        source,
                    }
                })?;
            }
            None => tracing::warn!(
                "node '{}': secure-call service offers no notification interrupts",
                node.name()
            ),
        },
        Err(source @ IrqSpecError::Malformed(_)) => {
            return Err(CreateError::BadIrqProperty {
                node: node.name().into(),
                source,
            })
        }
        Err(err) => tracing::warn!(
            "node '{}': no notification interrupt routed: {err}",
            node.name()
        ),
    }

    guest.register_smc_handler(proxy.clone());
    Ok(proxy)
}
