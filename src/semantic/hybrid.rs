//! Hybrid scoring combining semantic and lexical similarity.
//!
//! The semantic weight (α) controls the balance:
//! - α=0.6: 60% semantic, 40% lexical (default)
//! - α=1.0: Pure semantic scoring
//!
//! When no embedding is available the semantic term is 0, so lexical-only
//! scores stay scaled by (1-α) and can never exceed it.

/// Default semantic weight for hybrid scoring.
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    semantic: f64,
    lexical: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self::new(DEFAULT_SEMANTIC_WEIGHT)
    }
}

impl HybridWeights {
    /// Weight for the semantic term, clamped to [0.0, 1.0].
    pub fn new(semantic_weight: f64) -> Self {
        let semantic = semantic_weight.clamp(0.0, 1.0);
        Self {
            semantic,
            lexical: 1.0 - semantic,
        }
    }

    pub fn semantic(&self) -> f64 {
        self.semantic
    }

    pub fn lexical(&self) -> f64 {
        self.lexical
    }

    /// Weighted sum of the two signals, kept within [0.0, 1.0].
    ///
    /// `semantic` is `None` when either side had no usable embedding.
    pub fn combine(&self, semantic: Option<f64>, lexical: f64) -> f64 {
        let semantic = semantic.unwrap_or(0.0).clamp(0.0, 1.0);
        let lexical = lexical.clamp(0.0, 1.0);
        (self.semantic * semantic + self.lexical * lexical).clamp(0.0, 1.0)
    }
}
