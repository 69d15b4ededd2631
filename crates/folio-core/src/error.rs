use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FolioError {
    #[error("Invalid universe: {0}")]
    InvalidUniverse(String),

    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Data unavailable for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("Insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("Constraint infeasible: {0}")]
    ConstraintInfeasible(String),

    #[error("Numerical instability in {context}: {reason}")]
    NumericalInstability { context: String, reason: String },

    #[error("Computation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Serializable failure marker carried in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUniverse,
    InvalidInput,
    DataUnavailable,
    InsufficientHistory,
    ConstraintInfeasible,
    NumericalInstability,
    Cancelled,
    Serialization,
}

impl FolioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FolioError::InvalidUniverse(_) => ErrorKind::InvalidUniverse,
            FolioError::InvalidInput { .. } => ErrorKind::InvalidInput,
            FolioError::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            FolioError::InsufficientHistory(_) => ErrorKind::InsufficientHistory,
            FolioError::ConstraintInfeasible(_) => ErrorKind::ConstraintInfeasible,
            FolioError::NumericalInstability { .. } => ErrorKind::NumericalInstability,
            FolioError::Cancelled => ErrorKind::Cancelled,
            FolioError::SerializationError(_) => ErrorKind::Serialization,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FolioError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unstable(context: impl Into<String>, reason: impl Into<String>) -> Self {
        FolioError::NumericalInstability {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for FolioError {
    fn from(e: serde_json::Error) -> Self {
        FolioError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            FolioError::ConstraintInfeasible("x".into()).kind(),
            ErrorKind::ConstraintInfeasible
        );
        assert_eq!(FolioError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            FolioError::unstable("qp", "no convergence").kind(),
            ErrorKind::NumericalInstability
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorKind::NumericalInstability).unwrap();
        assert_eq!(s, "\"numerical_instability\"");
    }
}
