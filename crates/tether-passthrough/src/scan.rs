use tether_dt::{DtNode, IrqLines, IrqSpecError, RegError};
use tether_guest::{Guest, GuestAddr};
use tether_irq::bind_line;
use tether_vbus::VirtBus;

use crate::error::CreateError;

/// Counts the node's `reg` entries.
///
/// A node without a `reg` declaration has zero entries and is never
/// iterated. Iteration ends at the bad-index sentinel; every other failure
/// means the property itself is broken.
pub fn reg_entry_count(node: &dyn DtNode) -> Result<usize, CreateError> {
    if !node.has_reg() {
        return Ok(0);
    }

    let mut index = 0;
    loop {
        match node.reg_entry(index) {
            Ok(_) => index += 1,
            Err(RegError::BadIndex) => return Ok(index),
            Err(source) => {
                return Err(CreateError::BadRegProperty {
                    node: node.name().into(),
                    source,
                })
            }
        }
    }
}

/// Counts the node's interrupt entries by walking the line iterator until
/// the out-of-range sentinel.
pub fn interrupt_count(node: &dyn DtNode) -> Result<usize, CreateError> {
    if !node.has_interrupts() {
        return Ok(0);
    }

    let mut lines = IrqLines::new(node);
    let mut count = 0;
    loop {
        match lines.next() {
            Ok(_) => count += 1,
            Err(IrqSpecError::OutOfRange) => return Ok(count),
            Err(source) => {
                return Err(CreateError::BadIrqProperty {
                    node: node.name().into(),
                    source,
                })
            }
        }
    }
}

/// Checks that every translatable `reg` entry lies within the guest's valid
/// address windows.
///
/// Entries that do not translate are managed elsewhere and skipped.
pub fn validate_reg_windows(node: &dyn DtNode, guest: &Guest) -> Result<(), CreateError> {
    if !node.has_reg() {
        return Ok(());
    }

    let mut index = 0;
    loop {
        match node.reg_entry(index) {
            Ok(entry) => {
                if !guest.region_valid(GuestAddr(entry.addr), entry.size) {
                    return Err(CreateError::RegOutsideGuest {
                        node: node.name().into(),
                        index,
                        addr: GuestAddr(entry.addr),
                        size: entry.size,
                    });
                }
            }
            Err(RegError::BadIndex) => return Ok(()),
            Err(RegError::NotTranslatable) => {}
            Err(RegError::AddressRange) => {
                tracing::info!("node '{}': reg entry {index} too large", node.name());
                return Err(CreateError::RegTooLarge {
                    node: node.name().into(),
                    index,
                });
            }
            Err(source) => {
                return Err(CreateError::BadRegProperty {
                    node: node.name().into(),
                    source,
                })
            }
        }
        index += 1;
    }
}

/// Validates and binds the node's virtual-controller interrupt lines, all or
/// nothing.
///
/// Pass 1 only checks availability on the bus and has no side effects, so a
/// node whose second line is already consumed leaves its first line unbound
/// as well. Pass 2 performs the bindings and consumes the lines; on this
/// path the device-tree line number doubles as the physical line number.
pub fn validate_and_bind_lines(
    guest: &mut Guest,
    bus: &mut VirtBus,
    node: &dyn DtNode,
) -> Result<(), CreateError> {
    if !node.has_interrupts() {
        return Ok(());
    }

    let mut lines = IrqLines::new(node);
    loop {
        match lines.next() {
            Ok(spec) => {
                if spec.virtual_parent().is_some() && !bus.line_present(spec.line) {
                    return Err(CreateError::LineUnavailable {
                        node: node.name().into(),
                        line: spec.line,
                    });
                }
            }
            Err(IrqSpecError::OutOfRange) => break,
            Err(source) => {
                return Err(CreateError::BadIrqProperty {
                    node: node.name().into(),
                    source,
                })
            }
        }
    }

    let icu = bus.icu();
    let mut lines = IrqLines::new(node);
    loop {
        match lines.next() {
            Ok(spec) => {
                if let Some(ic) = spec.virtual_parent() {
                    bind_line(guest, &icu, ic, spec.line, spec.line, node.name()).map_err(
                        |source| CreateError::Bind {
                            node: node.name().into(),
                            source,
                        },
                    )?;
                    bus.consume_line(spec.line);
                }
            }
            // Pass 1 already vetted every entry.
            Err(_) => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tether_dt::{IrqSpec, RegEntry};

    /// A node that records whether its entry accessors were ever touched.
    #[derive(Default)]
    struct BareNode {
        reg_probes: Cell<usize>,
        irq_probes: Cell<usize>,
    }

    impl DtNode for BareNode {
        fn name(&self) -> &str {
            "bare"
        }

        fn device_id(&self) -> Option<&str> {
            None
        }

        fn has_reg(&self) -> bool {
            false
        }

        fn reg_entry(&self, _index: usize) -> Result<RegEntry, RegError> {
            self.reg_probes.set(self.reg_probes.get() + 1);
            Err(RegError::BadIndex)
        }

        fn has_interrupts(&self) -> bool {
            false
        }

        fn interrupt(&self, _index: usize) -> Result<IrqSpec, IrqSpecError> {
            self.irq_probes.set(self.irq_probes.get() + 1);
            Err(IrqSpecError::OutOfRange)
        }
    }

    #[test]
    fn undeclared_properties_count_zero_without_iterating() {
        let node = BareNode::default();

        assert_eq!(reg_entry_count(&node).unwrap(), 0);
        assert_eq!(interrupt_count(&node).unwrap(), 0);

        assert_eq!(node.reg_probes.get(), 0);
        assert_eq!(node.irq_probes.get(), 0);
    }

    #[test]
    fn counting_stops_at_the_sentinel_and_rejects_malformed_entries() {
        use tether_dt::StaticNode;

        let node = StaticNode::new("uart").with_reg(0x1000, 0x100).with_reg(0x2000, 0x100);
        assert_eq!(reg_entry_count(&node).unwrap(), 2);

        let broken = StaticNode::new("uart")
            .with_reg(0x1000, 0x100)
            .with_reg_outcome(RegError::Malformed("truncated cell"));
        assert_eq!(
            reg_entry_count(&broken).unwrap_err(),
            CreateError::BadRegProperty {
                node: "uart".into(),
                source: RegError::Malformed("truncated cell"),
            }
        );
    }
}
