//! Inclusive value windows.

use serde::{Deserialize, Serialize};

/// Closed interval `[min, max]`.
///
/// Construction orders the bounds, so a window derived from a model with a negative
/// coefficient still contains everything between its two end points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Lower bound (inclusive)
    pub min: f64,
    /// Upper bound (inclusive)
    pub max: f64,
}

impl Window {
    /// Window between two end points given in any order.
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Inclusive on both bounds.
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    /// Widen the window by `margin` on both sides.
    pub fn widened(&self, margin: f64) -> Self {
        Self::new(self.min - margin, self.max + margin)
    }
}
