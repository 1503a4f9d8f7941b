//! Smoothing filter over the aggregate latency series.

use crate::config::FilterMode;

/// Fixed-capacity window of recent aggregate latencies.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterWindow {
    mode: FilterMode,
    buf: Vec<f64>,
    index: usize,
    reset: bool,
}

impl FilterWindow {
    pub fn new(mode: FilterMode, size: usize) -> Self {
        Self {
            mode,
            buf: vec![0.0; size],
            index: 0,
            reset: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != FilterMode::None && !self.buf.is_empty()
    }

    /// Rebuild the window if the mode or size changed.
    pub fn reconfigure(&mut self, mode: FilterMode, size: usize) {
        if self.mode != mode || self.buf.len() != size {
            tracing::debug!("Filter reconfigured: {:?} x {}", mode, size);
            *self = Self::new(mode, size);
        }
    }

    /// Push one sample and return the filtered value.
    ///
    /// The first sample after a reset fills every slot.
    pub fn push(&mut self, value: f64) -> f64 {
        if !self.is_enabled() {
            return value;
        }

        if self.reset {
            self.reset = false;
            self.buf.fill(value);
        } else {
            self.buf[self.index] = value;
        }

        let filtered = match self.mode {
            FilterMode::Average => self.buf.iter().sum::<f64>() / self.buf.len() as f64,
            FilterMode::Median => {
                self.resort();
                self.buf[self.buf.len() / 2]
            }
            FilterMode::None => value,
        };

        self.index = (self.index + 1) % self.buf.len();
        filtered
    }

    /// Restore sorted order after a write at `index`, moving the new value
    /// only as far as it needs to go.
    fn resort(&mut self) {
        let i = self.index;
        let last = self.buf.len() - 1;

        if i < last && self.buf[i] > self.buf[i + 1] {
            for j in i..last {
                if self.buf[j] > self.buf[j + 1] {
                    self.buf.swap(j, j + 1);
                }
            }
        } else if i > 0 && self.buf[i - 1] > self.buf[i] {
            for j in (1..=i).rev() {
                if self.buf[j] < self.buf[j - 1] {
                    self.buf.swap(j, j - 1);
                }
            }
        }
    }
}
