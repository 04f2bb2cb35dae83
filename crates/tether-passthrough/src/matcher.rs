use tether_dt::{DtNode, IrqLines};
use tether_guest::{DsHandler, Guest, GuestAddr, MapError, Region};
use tether_irq::bind_line;
use tether_vbus::{ResourceKind, VirtBus};

use crate::error::CreateError;
use crate::factory::ProxyDevice;
use crate::scan::{interrupt_count, reg_entry_count};

/// Creates a proxy for the physical-bus device with hardware id `hid`,
/// matching its resource slots against the node's reg and interrupt lists.
///
/// Every `reg<N>`/`irq<N>` slot must find its device-tree counterpart and
/// every counted entry must be matched by a slot; any disagreement between
/// the two descriptions is fatal. Slots with unrecognized names are
/// intentionally unexposed to the guest and skipped.
pub(crate) fn create_from_bus_device(
    guest: &mut Guest,
    bus: &mut VirtBus,
    node: &dyn DtNode,
    hid: &str,
) -> Result<ProxyDevice, CreateError> {
    let Some(index) = bus.find_unassigned(hid) else {
        tracing::warn!(
            "node '{}': requested bus device '{hid}' not available",
            node.name()
        );
        return Err(CreateError::DeviceUnavailable {
            node: node.name().into(),
            hid: hid.into(),
        });
    };

    // Expected-entry counts are a cheap validation of the node's properties
    // before anything is claimed or mapped.
    let expected_irqs = interrupt_count(node)?;
    let mut todo_regs = reg_entry_count(node)?;
    let mut todo_irqs = expected_irqs;

    let io = bus.claim(index);
    let device_name = bus.device(index).name().to_owned();
    let resources = bus.device(index).resources().to_vec();
    let icu = bus.icu();

    for res in &resources {
        match res.kind {
            ResourceKind::Memory => {
                let Some(slot) = res.name.indexed(b"reg") else {
                    tracing::warn!(
                        "node '{}': bus memory resource '{}' has no recognisable name",
                        node.name(),
                        res.name
                    );
                    continue;
                };

                let entry = node.reg_entry(slot).map_err(|_| CreateError::UnmatchedSlot {
                    node: node.name().into(),
                    name: res.name,
                })?;
                if entry.size != res.size() {
                    return Err(CreateError::SizeMismatch {
                        node: node.name().into(),
                        name: res.name,
                        resource: res.size(),
                        declared: entry.size,
                    });
                }

                let region = Region::with_size(GuestAddr(entry.addr), entry.size).ok_or_else(
                    || CreateError::Mmio {
                        node: node.name().into(),
                        source: MapError::InvalidRegion {
                            start: GuestAddr(entry.addr),
                            size: entry.size,
                        },
                    },
                )?;
                tracing::debug!(
                    "node '{}': mmio {device_name}.{} [{:#x}..={:#x}] -> {region}",
                    node.name(),
                    res.name,
                    res.start,
                    res.end
                );
                guest
                    .add_mmio_region(region, Box::new(DsHandler::new(bus.io_ds(), res.start)))
                    .map_err(|source| CreateError::Mmio {
                        node: node.name().into(),
                        source,
                    })?;
                todo_regs = todo_regs.saturating_sub(1);
            }
            ResourceKind::Interrupt => {
                let Some(slot) = res.name.indexed(b"irq") else {
                    tracing::warn!(
                        "node '{}': bus interrupt resource '{}' has no recognisable name",
                        node.name(),
                        res.name
                    );
                    continue;
                };

                if slot >= expected_irqs {
                    tracing::error!(
                        "node '{}': bus interrupt resource '{}' has no matching device-tree entry",
                        node.name(),
                        res.name
                    );
                    return Err(CreateError::UnmatchedSlot {
                        node: node.name().into(),
                        name: res.name,
                    });
                }

                // Re-walk the ordered line list up to the slot's entry; the
                // count above already vetted these entries.
                let mut lines = IrqLines::new(node);
                let mut spec = lines.next();
                for _ in 0..slot {
                    spec = lines.next();
                }
                let spec = spec.map_err(|source| CreateError::BadIrqProperty {
                    node: node.name().into(),
                    source,
                })?;

                if let Some(ic) = spec.virtual_parent() {
                    bind_line(guest, &icu, ic, spec.line, res.start as u32, node.name()).map_err(
                        |source| CreateError::Bind {
                            node: node.name().into(),
                            source,
                        },
                    )?;
                }
                tracing::debug!(
                    "node '{}': interrupt {device_name}.{} line {:#x}",
                    node.name(),
                    res.name,
                    res.start
                );
                todo_irqs = todo_irqs.saturating_sub(1);
            }
        }
    }

    if todo_regs > 0 || todo_irqs > 0 {
        tracing::error!(
            "node '{}': bus device '{hid}' left {todo_regs} reg and {todo_irqs} \
             interrupt entries unmatched",
            node.name()
        );
        return Err(CreateError::UnmatchedEntries {
            node: node.name().into(),
            regs: todo_regs,
            irqs: todo_irqs,
        });
    }

    Ok(ProxyDevice::named(io))
}
