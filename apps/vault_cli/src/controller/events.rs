//! Backend-to-terminal events and error modeling for the CLI controller.

use client_core::{FlowEvent, FlowSnapshot, FlowState, Step, StepFailure};
use ethers::{
    types::U256,
    utils::{format_ether as ether_units, to_checksum},
};
use shared::error::ErrorCode;

#[derive(Debug, Clone)]
pub enum UiEvent {
    Info(String),
    Flow(FlowEvent),
    Status(FlowSnapshot),
    Error(UiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Wallet,
    Service,
    Chain,
    Validation,
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    Step(Step),
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
    reconnect: bool,
}

impl UiError {
    pub fn from_failure(failure: &StepFailure) -> Self {
        Self {
            category: category_for(failure.code()),
            context: UiErrorContext::Step(failure.step),
            message: failure.error.to_string(),
            reconnect: matches!(
                failure.code(),
                ErrorCode::NoSession | ErrorCode::ConnectionError
            ),
        }
    }

    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let category = if lower.contains("disconnected")
            || lower.contains("queue")
            || lower.contains("runtime")
        {
            UiErrorCategory::Transport
        } else if lower.contains("invalid") || lower.contains("usage") {
            UiErrorCategory::Validation
        } else {
            UiErrorCategory::Wallet
        };
        Self {
            category,
            context,
            message,
            reconnect: false,
        }
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the user has to reconnect the wallet before retrying.
    pub fn requires_reconnect(&self) -> bool {
        self.reconnect
    }
}

fn category_for(code: ErrorCode) -> UiErrorCategory {
    match code {
        ErrorCode::ProviderUnavailable
        | ErrorCode::UserRejected
        | ErrorCode::ConnectionError
        | ErrorCode::NoSession => UiErrorCategory::Wallet,
        ErrorCode::AssessmentUnavailable | ErrorCode::MalformedResponse => UiErrorCategory::Service,
        ErrorCode::ContractCallFailed
        | ErrorCode::InsufficientFunds
        | ErrorCode::TransactionFailed
        | ErrorCode::NotEligible => UiErrorCategory::Chain,
        ErrorCode::InvalidInput
        | ErrorCode::NoAssessment
        | ErrorCode::AlreadyPending
        | ErrorCode::StaleQuote
        | ErrorCode::NotPaid => UiErrorCategory::Validation,
    }
}

fn err_label(category: UiErrorCategory) -> &'static str {
    match category {
        UiErrorCategory::Wallet => "Wallet",
        UiErrorCategory::Service => "Scoring service",
        UiErrorCategory::Chain => "On-chain",
        UiErrorCategory::Validation => "Validation",
        UiErrorCategory::Transport => "Transport",
    }
}

/// Renders a wei amount as ether with trailing zeros trimmed.
pub fn format_ether(wei: U256) -> String {
    let ether = ether_units(wei);
    format!("{} ETH", ether.trim_end_matches('0').trim_end_matches('.'))
}

pub fn render_event(event: &UiEvent) -> Option<String> {
    match event {
        UiEvent::Info(message) => Some(message.clone()),
        UiEvent::Flow(event) => render_flow_event(event),
        UiEvent::Status(snapshot) => Some(render_status(snapshot)),
        UiEvent::Error(error) => Some(render_error(error)),
    }
}

fn render_flow_event(event: &FlowEvent) -> Option<String> {
    match event {
        // Every transition is followed by a more specific event, or is the
        // visible effect of one.
        FlowEvent::StateChanged(_) => None,
        FlowEvent::Connected { account, chain_id } => Some(format!(
            "Connected as {} on {}",
            to_checksum(account, None),
            network_label(*chain_id)
        )),
        FlowEvent::SessionLost => {
            Some("Wallet session ended; run `connect` to continue.".to_string())
        }
        FlowEvent::AssessmentReady(assessment) => Some(format!(
            "Risk score for {}: {}/100 ({}; https={}, {}, HTTP {})",
            assessment.url,
            assessment.score,
            assessment.message,
            assessment.checks.https,
            assessment.checks.ssl_version,
            assessment.checks.status_code
        )),
        FlowEvent::PremiumQuoted(quote) => Some(format!(
            "Premium for score {}: {}",
            quote.score,
            format_ether(quote.amount)
        )),
        FlowEvent::PaymentConfirmed(receipt) => Some(format!(
            "Premium of {} paid in transaction {:?}",
            format_ether(receipt.amount),
            receipt.transaction_hash
        )),
        FlowEvent::PayoutClaimed(receipt) => Some(format!(
            "Payout claimed in transaction {:?}",
            receipt.transaction_hash
        )),
        FlowEvent::StepFailed(failure) => Some(render_error(&UiError::from_failure(failure))),
    }
}

fn render_error(error: &UiError) -> String {
    let prefix = match error.context() {
        UiErrorContext::Step(step) => format!("{step} failed"),
        UiErrorContext::BackendStartup => "backend startup failed".to_string(),
    };
    let mut line = format!(
        "{prefix}: {} error: {}",
        err_label(error.category()),
        error.message()
    );
    if error.requires_reconnect() {
        line.push_str(" (run `connect` to retry)");
    }
    line
}

fn render_status(snapshot: &FlowSnapshot) -> String {
    let mut lines = vec![format!("state: {}", snapshot.state)];
    match (snapshot.account, snapshot.chain_id) {
        (Some(account), Some(chain_id)) => {
            lines.push(format!(
                "account: {} ({})",
                to_checksum(&account, None),
                network_label(chain_id)
            ));
        }
        _ => lines.push("account: not connected".to_string()),
    }
    if let Some(assessment) = &snapshot.assessment {
        lines.push(format!(
            "assessment: {} scored {}/100 at {}",
            assessment.url,
            assessment.score,
            assessment.assessed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(request_id) = snapshot.pending_request {
        lines.push(format!("assessment request {request_id} in flight"));
    }
    if let Some(payment) = &snapshot.payment {
        lines.push(format!(
            "paid: {} in {:?}",
            format_ether(payment.amount),
            payment.transaction_hash
        ));
    }
    if snapshot.state == FlowState::Paid {
        lines.push("next: `claim` or `assess <url>`".to_string());
    }
    lines.join("\n")
}

fn network_label(chain_id: shared::domain::ChainId) -> String {
    match chain_id.network_name() {
        Some(name) => name.to_string(),
        None => format!("chain {chain_id}"),
    }
}
