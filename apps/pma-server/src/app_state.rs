use std::sync::Arc;

use pma_events::Bus;
use pma_kernel::Kernel;
use pma_policy::Gate;

use crate::llm::CompletionClient;

#[derive(Clone)]
pub(crate) struct AppState {
    bus: Bus,
    kernel: Kernel,
    gate: Arc<Gate>,
    llm: CompletionClient,
    endpoints: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        bus: Bus,
        kernel: Kernel,
        gate: Arc<Gate>,
        llm: CompletionClient,
        endpoints: Arc<Vec<String>>,
    ) -> Self {
        Self {
            bus,
            kernel,
            gate,
            llm,
            endpoints,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn llm(&self) -> &CompletionClient {
        &self.llm
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}
