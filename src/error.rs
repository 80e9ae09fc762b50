//! Typed errors for the decision engine and its collaborators.

use crate::signals::core::AnalyzerRole;

/// Failures while reducing a bar sequence to a timeframe state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    #[error("insufficient history for {role:?} analysis: have {have} bars, need {need}")]
    InsufficientHistory {
        role: AnalyzerRole,
        have: usize,
        need: usize,
    },
}

/// Failures raised by the risk manager.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskError {
    #[error("invalid sizing: {reason}")]
    InvalidSizing { reason: String },

    #[error("outcome for trade {trade_id} was already reported")]
    DuplicateOutcome { trade_id: String },
}

/// Failures raised by a broker implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("market data unavailable: {reason}")]
    DataUnavailable { reason: String },

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("requote: {reason}")]
    Requote { reason: String },
}

impl BrokerError {
    /// Whether the failure may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionLost { .. } | BrokerError::Requote { .. }
        )
    }
}
