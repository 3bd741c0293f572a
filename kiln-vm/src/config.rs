//! Runtime configuration

use serde::{Deserialize, Serialize};

/// Resource limits and diagnostics switches for a [`crate::Vm`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Deepest allowed nesting of compiled-function calls
    pub max_call_depth: usize,
    /// Largest operand stack, summed over all frames
    pub max_stack_values: usize,
    /// Emit a trace event per dispatched instruction
    pub trace: bool,
    /// Record per-frame operand stack peaks in [`crate::ExecStats`]
    pub collect_stats: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 1_000,
            max_stack_values: 100_000,
            trace: false,
            collect_stats: false,
        }
    }
}

impl VmConfig {
    /// Create limits suitable for untrusted code
    pub fn sandboxed() -> Self {
        Self {
            max_call_depth: 100,
            max_stack_values: 10_000,
            ..Self::default()
        }
    }

    /// Create limits suitable for testing
    pub fn testing() -> Self {
        Self {
            max_call_depth: 64,
            max_stack_values: 1_000,
            collect_stats: true,
            ..Self::default()
        }
    }
}
