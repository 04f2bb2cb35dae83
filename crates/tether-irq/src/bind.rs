use std::sync::Arc;

use thiserror::Error;

use crate::forwarder::IrqForwarder;
use crate::source::{
    EndpointRegistry, IcuError, IrqSource, PhysicalIcu, RegistryError, VirtualIc,
};

/// Errors creating or validating a line binding.
///
/// All of these are fatal to the device under construction: a half-bound
/// interrupt route must never be allowed to run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error(
        "guest line {dt_line:#x} is already routed from physical line {bound:#x}, \
         refusing physical line {requested:#x}"
    )]
    LineConflict {
        dt_line: u32,
        bound: u32,
        requested: u32,
    },
    #[error("guest line {dt_line:#x} is bound to an incompatible interrupt source")]
    IncompatibleSource { dt_line: u32 },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Icu(#[from] IcuError),
}

/// Creates or validates the binding from physical line `io_line` to guest
/// line `dt_line` of `ic`.
///
/// If `dt_line` has no source yet, a new [`IrqForwarder`] over `io_line` is
/// registered as a delivery endpoint, bound on the physical controller,
/// wired to `(ic, dt_line)` in both directions and acknowledged once to
/// clear latent pending state.
///
/// If `dt_line` already has a source, the request succeeds without mutation
/// when that source forwards the same physical line, and fails with
/// [`BindError::LineConflict`] or [`BindError::IncompatibleSource`]
/// otherwise. This makes the function safe to call more than once for the
/// same route, e.g. during a bulk preparation pass and again during per-node
/// device creation, without duplicating kernel-level registrations.
pub fn bind_line(
    registry: &mut dyn EndpointRegistry,
    icu: &Arc<dyn PhysicalIcu>,
    ic: &Arc<dyn VirtualIc>,
    dt_line: u32,
    io_line: u32,
    dev_name: &str,
) -> Result<(), BindError> {
    if let Some(existing) = ic.source(dt_line) {
        tracing::warn!(
            "device '{dev_name}': line {io_line:#x} -> {dt_line:#x} already registered"
        );
        return match existing.forwarded_line() {
            Some(bound) if bound == io_line => Ok(()),
            Some(bound) => Err(BindError::LineConflict {
                dt_line,
                bound,
                requested: io_line,
            }),
            None => Err(BindError::IncompatibleSource { dt_line }),
        };
    }

    tracing::info!("device '{dev_name}': routing physical line {io_line:#x} -> guest line {dt_line:#x}");

    let forwarder = Arc::new(IrqForwarder::new(icu.clone(), io_line));
    registry.register_endpoint(&forwarder)?;

    // The association is 1:1, so an unbound physical line binds cleanly.
    icu.bind(io_line, forwarder.clone())?;

    forwarder.set_sink(ic.clone(), dt_line);
    ic.bind_source(dt_line, forwarder.clone());

    // Clear any pending state latched before the route existed.
    forwarder.eoi();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::IrqSource;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockIc {
        sources: Mutex<BTreeMap<u32, Arc<dyn IrqSource>>>,
        raised: Mutex<Vec<u32>>,
    }

    impl VirtualIc for MockIc {
        fn source(&self, line: u32) -> Option<Arc<dyn IrqSource>> {
            self.sources.lock().unwrap().get(&line).cloned()
        }

        fn bind_source(&self, line: u32, source: Arc<dyn IrqSource>) {
            self.sources.lock().unwrap().insert(line, source);
        }

        fn raise(&self, line: u32) {
            self.raised.lock().unwrap().push(line);
        }
    }

    #[derive(Default)]
    struct MockIcu {
        bound: Mutex<BTreeMap<u32, Arc<IrqForwarder>>>,
        acks: Mutex<Vec<u32>>,
    }

    impl PhysicalIcu for MockIcu {
        fn bind(&self, io_line: u32, endpoint: Arc<IrqForwarder>) -> Result<(), IcuError> {
            let mut bound = self.bound.lock().unwrap();
            if bound.contains_key(&io_line) {
                return Err(IcuError::AlreadyBound(io_line));
            }
            bound.insert(io_line, endpoint);
            Ok(())
        }

        fn ack(&self, io_line: u32) {
            self.acks.lock().unwrap().push(io_line);
        }
    }

    #[derive(Default)]
    struct VecRegistry {
        endpoints: Vec<Arc<IrqForwarder>>,
    }

    impl EndpointRegistry for VecRegistry {
        fn register_endpoint(&mut self, endpoint: &Arc<IrqForwarder>) -> Result<(), RegistryError> {
            self.endpoints.push(endpoint.clone());
            Ok(())
        }
    }

    fn harness() -> (VecRegistry, Arc<MockIcu>, Arc<dyn PhysicalIcu>, Arc<MockIc>, Arc<dyn VirtualIc>) {
        let registry = VecRegistry::default();
        let icu = Arc::new(MockIcu::default());
        let ic = Arc::new(MockIc::default());
        (
            registry,
            icu.clone(),
            icu as Arc<dyn PhysicalIcu>,
            ic.clone(),
            ic as Arc<dyn VirtualIc>,
        )
    }

    #[test]
    fn first_bind_wires_and_acknowledges_once() {
        let (mut registry, icu, icu_dyn, ic, ic_dyn) = harness();

        bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 5, "uart").unwrap();

        assert_eq!(registry.endpoints.len(), 1);
        assert!(icu.bound.lock().unwrap().contains_key(&5));
        assert_eq!(icu.acks.lock().unwrap().as_slice(), &[5]);

        let source = ic.source(42).expect("source bound");
        assert_eq!(source.forwarded_line(), Some(5));
    }

    #[test]
    fn rebinding_the_same_route_is_idempotent() {
        let (mut registry, icu, icu_dyn, _ic, ic_dyn) = harness();

        bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 5, "uart").unwrap();
        bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 5, "uart").unwrap();

        // No second endpoint, no second ack.
        assert_eq!(registry.endpoints.len(), 1);
        assert_eq!(icu.bound.lock().unwrap().len(), 1);
        assert_eq!(icu.acks.lock().unwrap().as_slice(), &[5]);
    }

    #[test]
    fn rebinding_with_a_different_physical_line_reports_both_lines() {
        let (mut registry, _icu, icu_dyn, ic, ic_dyn) = harness();

        bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 5, "uart").unwrap();
        let err = bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 9, "timer").unwrap_err();

        assert_eq!(
            err,
            BindError::LineConflict {
                dt_line: 42,
                bound: 5,
                requested: 9
            }
        );

        // The original binding survives.
        assert_eq!(ic.source(42).unwrap().forwarded_line(), Some(5));
        assert_eq!(registry.endpoints.len(), 1);
    }

    #[test]
    fn rebinding_over_a_foreign_source_is_incompatible() {
        struct LocalSource;
        impl IrqSource for LocalSource {
            fn eoi(&self) {}
        }

        let (mut registry, _icu, icu_dyn, ic, ic_dyn) = harness();
        ic.bind_source(42, Arc::new(LocalSource));

        let err = bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 5, "uart").unwrap_err();
        assert_eq!(err, BindError::IncompatibleSource { dt_line: 42 });
        assert!(registry.endpoints.is_empty());
    }

    #[test]
    fn physical_bind_failure_propagates() {
        let (mut registry, icu, icu_dyn, _ic, ic_dyn) = harness();

        bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 5, "uart").unwrap();
        // A second guest line contending for the same physical line trips the
        // 1:1 invariant on the controller.
        let err = bind_line(&mut registry, &icu_dyn, &ic_dyn, 43, 5, "uart").unwrap_err();
        assert_eq!(err, BindError::Icu(IcuError::AlreadyBound(5)));
        assert_eq!(icu.bound.lock().unwrap().len(), 1);
    }

    #[test]
    fn notify_raises_the_sink_line_and_eoi_acknowledges() {
        let (mut registry, icu, icu_dyn, ic, ic_dyn) = harness();

        bind_line(&mut registry, &icu_dyn, &ic_dyn, 42, 5, "uart").unwrap();
        let endpoint = icu.bound.lock().unwrap().get(&5).unwrap().clone();

        endpoint.notify();
        assert_eq!(ic.raised.lock().unwrap().as_slice(), &[42]);

        ic.source(42).unwrap().eoi();
        // One ack from bind time, one from the guest's end-of-interrupt.
        assert_eq!(icu.acks.lock().unwrap().as_slice(), &[5, 5]);
    }
}
