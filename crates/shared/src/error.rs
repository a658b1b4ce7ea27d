use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by the orchestration core and its front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ProviderUnavailable,
    UserRejected,
    ConnectionError,
    InvalidInput,
    AssessmentUnavailable,
    MalformedResponse,
    NoSession,
    NoAssessment,
    ContractCallFailed,
    InsufficientFunds,
    TransactionFailed,
    NotEligible,
    AlreadyPending,
    StaleQuote,
    NotPaid,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProviderUnavailable => "provider_unavailable",
            Self::UserRejected => "user_rejected",
            Self::ConnectionError => "connection_error",
            Self::InvalidInput => "invalid_input",
            Self::AssessmentUnavailable => "assessment_unavailable",
            Self::MalformedResponse => "malformed_response",
            Self::NoSession => "no_session",
            Self::NoAssessment => "no_assessment",
            Self::ContractCallFailed => "contract_call_failed",
            Self::InsufficientFunds => "insufficient_funds",
            Self::TransactionFailed => "transaction_failed",
            Self::NotEligible => "not_eligible",
            Self::AlreadyPending => "already_pending",
            Self::StaleQuote => "stale_quote",
            Self::NotPaid => "not_paid",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
