use std::sync::Arc;

use ethers::types::{Address, TxHash, U256};
use shared::domain::{RequestId, RiskScore, SessionId};
use tracing::{debug, info, warn};

use crate::{
    error::{FlowError, Step},
    inflight::InflightRegistry,
    risk::RiskAssessment,
    session::{Session, SessionManager},
    wallet::WalletError,
};

/// Premium owed for one assessment, as computed by the contract at quote time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremiumQuote {
    pub session_id: SessionId,
    pub account: Address,
    pub request_id: RequestId,
    pub score: RiskScore,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub transaction_hash: TxHash,
    pub account: Address,
    pub score: RiskScore,
    pub amount: U256,
    pub block_number: Option<u64>,
}

pub struct PremiumOrchestrator {
    sessions: Arc<SessionManager>,
    inflight: InflightRegistry,
}

impl PremiumOrchestrator {
    pub fn new(sessions: Arc<SessionManager>, inflight: InflightRegistry) -> Self {
        Self { sessions, inflight }
    }

    pub async fn quote(
        &self,
        session: &Session,
        assessment: &RiskAssessment,
    ) -> Result<PremiumQuote, FlowError> {
        self.sessions.ensure_current(session)?;
        let amount = session
            .contract
            .calculate_premium(assessment.score)
            .await
            .map_err(|err| FlowError::ContractCallFailed(err.to_string()))?;
        debug!(
            account = ?session.account,
            score = %assessment.score,
            %amount,
            "premium quoted"
        );
        Ok(PremiumQuote {
            session_id: session.id,
            account: session.account,
            request_id: assessment.request_id,
            score: assessment.score,
            amount,
        })
    }

    /// Pays exactly `quote.amount`. The calculator is queried again right before
    /// submission and a drifted premium is refused rather than sent.
    ///
    /// Once the transaction is handed to the wallet the caller may stop waiting,
    /// but the account stays locked against further submissions until the
    /// outcome is known.
    pub async fn pay(
        &self,
        session: &Session,
        quote: &PremiumQuote,
    ) -> Result<PaymentReceipt, FlowError> {
        self.sessions.ensure_current(session)?;
        if quote.session_id != session.id || quote.account != session.account {
            return Err(FlowError::StaleQuote(
                "quote was derived under a different wallet session".to_string(),
            ));
        }

        let guard = self.inflight.try_acquire(session.account, Step::Pay)?;

        let current = session
            .contract
            .calculate_premium(quote.score)
            .await
            .map_err(|err| FlowError::ContractCallFailed(err.to_string()))?;
        if current != quote.amount {
            warn!(quoted = %quote.amount, %current, "premium drifted since quote");
            return Err(FlowError::StaleQuote(format!(
                "premium changed from {} to {current} since it was quoted",
                quote.amount
            )));
        }
        self.sessions.ensure_current(session)?;

        let contract = session.contract.clone();
        let request = contract.pay_premium_request(session.account, quote.score, quote.amount);
        let account = session.account;
        let score = quote.score;
        let amount = quote.amount;

        let task = tokio::spawn(async move {
            let _guard = guard;
            let tx_hash = contract.submit(&request).await.map_err(payment_error)?;
            info!(?account, ?tx_hash, %amount, "premium payment broadcast");

            let receipt = contract.confirm(tx_hash).await.map_err(payment_error)?;
            if !receipt.success {
                return Err(FlowError::TransactionFailed(format!(
                    "payment transaction {tx_hash:?} reverted"
                )));
            }
            info!(?account, ?tx_hash, block = ?receipt.block_number, "premium payment confirmed");
            Ok(PaymentReceipt {
                transaction_hash: tx_hash,
                account,
                score,
                amount,
                block_number: receipt.block_number,
            })
        });

        task.await
            .map_err(|err| FlowError::TransactionFailed(format!("payment task failed: {err}")))?
    }
}

fn payment_error(err: WalletError) -> FlowError {
    match err {
        WalletError::Rejected(reason) => FlowError::UserRejected(reason),
        WalletError::InsufficientFunds(reason) => FlowError::InsufficientFunds(reason),
        WalletError::ConfirmationTimeout(tx_hash) => FlowError::TransactionFailed(format!(
            "no confirmation for {tx_hash:?}; check the transaction before paying again"
        )),
        other => FlowError::TransactionFailed(other.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/premium_tests.rs"]
mod tests;
