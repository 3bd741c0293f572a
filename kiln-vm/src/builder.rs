//! Builder for configuring a [`Vm`]

use crate::config::VmConfig;
use crate::vm::Vm;
use kiln_core::Interop;
use std::sync::Arc;

/// Builder for constructing a VM with injected host services
#[derive(Default, Clone)]
pub struct VmBuilder {
    config: VmConfig,
    interop: Option<Arc<dyn Interop>>,
}

impl VmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.config.max_call_depth = depth;
        self
    }

    pub fn with_max_stack_values(mut self, values: usize) -> Self {
        self.config.max_stack_values = values;
        self
    }

    /// Emit a trace event per instruction
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.config.trace = enabled;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.config.collect_stats = enabled;
        self
    }

    /// Host method resolver used by `MethodCall`
    pub fn with_interop(mut self, interop: Arc<dyn Interop>) -> Self {
        self.interop = Some(interop);
        self
    }

    pub fn build(self) -> Vm {
        let vm = Vm::new(self.config);
        match self.interop {
            Some(interop) => vm.with_interop(interop),
            None => vm,
        }
    }
}
