use std::sync::{Arc, Mutex};

use crate::source::{IrqSource, PhysicalIcu, VirtualIc};

struct Sink {
    ic: Arc<dyn VirtualIc>,
    dt_line: u32,
}

/// Forwarding endpoint between one physical interrupt line and one line of a
/// virtual interrupt controller.
///
/// Delivery is asynchronous with respect to guest execution: the physical
/// controller invokes [`IrqForwarder::notify`] out of band, which raises the
/// sink line; the guest's end-of-interrupt travels back through
/// [`IrqSource::eoi`] and acknowledges the physical line.
pub struct IrqForwarder {
    io_line: u32,
    icu: Arc<dyn PhysicalIcu>,
    sink: Mutex<Option<Sink>>,
}

impl IrqForwarder {
    pub fn new(icu: Arc<dyn PhysicalIcu>, io_line: u32) -> Self {
        Self {
            io_line,
            icu,
            sink: Mutex::new(None),
        }
    }

    /// The physical line this endpoint forwards.
    pub fn io_line(&self) -> u32 {
        self.io_line
    }

    /// Points upstream delivery at `dt_line` of `ic`.
    pub fn set_sink(&self, ic: Arc<dyn VirtualIc>, dt_line: u32) {
        *self.sink.lock().unwrap() = Some(Sink { ic, dt_line });
    }

    /// Out-of-band notification that the physical line fired.
    ///
    /// Notifications arriving before the sink is wired up are dropped; the
    /// binding protocol acknowledges once after wiring, so no delivery is
    /// lost across setup.
    pub fn notify(&self) {
        let sink = self.sink.lock().unwrap();
        if let Some(sink) = sink.as_ref() {
            sink.ic.raise(sink.dt_line);
        }
    }
}

impl IrqSource for IrqForwarder {
    fn forwarded_line(&self) -> Option<u32> {
        Some(self.io_line)
    }

    fn eoi(&self) {
        self.icu.ack(self.io_line);
    }
}
