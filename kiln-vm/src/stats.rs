//! Execution counters

use serde::{Deserialize, Serialize};

/// Deepest operand stack the activations of one function reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePeak {
    pub function: String,
    pub observed: usize,
    /// `max_stack` the exporter computed for the function
    pub declared: usize,
    pub activations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStats {
    pub instructions: u64,
    pub calls: u64,
    /// One entry per function shape, only with `collect_stats`
    pub frame_peaks: Vec<FramePeak>,
}

impl ExecStats {
    /// Fold a finished activation into the entry for its function
    ///
    /// Functions are told apart by name and declared bound, so the number
    /// of entries follows the program rather than the call count.
    pub fn record_peak(&mut self, function: &str, observed: usize, declared: usize) {
        match self
            .frame_peaks
            .iter_mut()
            .find(|p| p.declared == declared && p.function == function)
        {
            Some(peak) => {
                peak.observed = peak.observed.max(observed);
                peak.activations += 1;
            }
            None => self.frame_peaks.push(FramePeak {
                function: function.to_string(),
                observed,
                declared,
                activations: 1,
            }),
        }
    }

    /// True when no activation outgrew its declared operand stack
    pub fn within_declared_bounds(&self) -> bool {
        self.frame_peaks.iter().all(|p| p.observed <= p.declared)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
