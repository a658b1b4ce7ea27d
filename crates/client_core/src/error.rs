use std::fmt;

use shared::error::ErrorCode;
use thiserror::Error;

/// User-visible step of the connect → assess → pay → claim sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    Assess,
    Quote,
    Pay,
    Claim,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Assess => "risk assessment",
            Self::Quote => "premium quote",
            Self::Pay => "premium payment",
            Self::Claim => "payout claim",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("no wallet provider is available")]
    ProviderUnavailable,
    #[error("request rejected in wallet: {0}")]
    UserRejected(String),
    #[error("wallet connection failed: {0}")]
    ConnectionError(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("risk assessment unavailable: {0}")]
    AssessmentUnavailable(String),
    #[error("malformed scoring response: {0}")]
    MalformedResponse(String),
    #[error("no active wallet session")]
    NoSession,
    #[error("no current risk assessment")]
    NoAssessment,
    #[error("contract call failed: {0}")]
    ContractCallFailed(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    #[error("not eligible for payout: {0}")]
    NotEligible(String),
    #[error("a {0} is already pending for this account")]
    AlreadyPending(Step),
    #[error("stale premium quote: {0}")]
    StaleQuote(String),
    #[error("premium must be paid for the current assessment before claiming")]
    NotPaid,
}

impl FlowError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ProviderUnavailable => ErrorCode::ProviderUnavailable,
            Self::UserRejected(_) => ErrorCode::UserRejected,
            Self::ConnectionError(_) => ErrorCode::ConnectionError,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::AssessmentUnavailable(_) => ErrorCode::AssessmentUnavailable,
            Self::MalformedResponse(_) => ErrorCode::MalformedResponse,
            Self::NoSession => ErrorCode::NoSession,
            Self::NoAssessment => ErrorCode::NoAssessment,
            Self::ContractCallFailed(_) => ErrorCode::ContractCallFailed,
            Self::InsufficientFunds(_) => ErrorCode::InsufficientFunds,
            Self::TransactionFailed(_) => ErrorCode::TransactionFailed,
            Self::NotEligible(_) => ErrorCode::NotEligible,
            Self::AlreadyPending(_) => ErrorCode::AlreadyPending,
            Self::StaleQuote(_) => ErrorCode::StaleQuote,
            Self::NotPaid => ErrorCode::NotPaid,
        }
    }
}

/// A failed step as surfaced to the user: which step, and why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{step} failed: {error}")]
pub struct StepFailure {
    pub step: Step,
    pub error: FlowError,
}

impl StepFailure {
    pub fn new(step: Step, error: FlowError) -> Self {
        Self { step, error }
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }
}
