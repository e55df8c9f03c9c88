//! Typed errors raised by the allocation core.
//!
//! These are expected conditions in financial time series (warm-up, gaps,
//! flat windows). Callers recover by skipping the allocation step and keeping
//! the previous weight vector.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    /// Not enough history yet to form two full comparison windows.
    #[error("not ready: {seen} rows available, {required} required")]
    NotReady { seen: usize, required: usize },

    /// A price column has too few observations to interpolate across gaps.
    #[error("insufficient data for {instrument}: {observed} observed prices, need at least 2")]
    InsufficientData { instrument: String, observed: usize },

    /// Window or weight input for which correlation is undefined.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Matrix and weight vector dimensions disagree.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl AllocationError {
    /// Whether this error only reflects a warm-up or gap condition.
    pub fn is_data_gap(&self) -> bool {
        matches!(
            self,
            AllocationError::NotReady { .. } | AllocationError::InsufficientData { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AllocationError::NotReady { seen: 3, required: 9 };
        assert_eq!(err.to_string(), "not ready: 3 rows available, 9 required");

        let err = AllocationError::InsufficientData {
            instrument: "AAPL".to_string(),
            observed: 1,
        };
        assert!(err.to_string().contains("AAPL"));
        assert!(err.is_data_gap());

        assert!(!AllocationError::DegenerateInput("flat".into()).is_data_gap());
    }
}
