use std::sync::Arc;

use ethers::types::{Address, TxHash};
use tracing::info;

use crate::{
    error::{FlowError, Step},
    inflight::InflightRegistry,
    session::{Session, SessionManager},
    wallet::WalletError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub transaction_hash: TxHash,
    pub account: Address,
    pub block_number: Option<u64>,
}

/// Submits payout claims. Eligibility is decided on-chain only, so repeated
/// claims are sent as-is and expected to fail cleanly once exhausted.
pub struct PayoutOrchestrator {
    sessions: Arc<SessionManager>,
    inflight: InflightRegistry,
}

impl PayoutOrchestrator {
    pub fn new(sessions: Arc<SessionManager>, inflight: InflightRegistry) -> Self {
        Self { sessions, inflight }
    }

    pub async fn claim(&self, session: &Session) -> Result<ClaimReceipt, FlowError> {
        self.sessions.ensure_current(session)?;
        let guard = self.inflight.try_acquire(session.account, Step::Claim)?;

        let contract = session.contract.clone();
        let request = contract.claim_payout_request(session.account);
        let account = session.account;

        let task = tokio::spawn(async move {
            let _guard = guard;
            let tx_hash = contract.submit(&request).await.map_err(claim_error)?;
            info!(?account, ?tx_hash, "payout claim broadcast");

            let receipt = contract.confirm(tx_hash).await.map_err(claim_error)?;
            if !receipt.success {
                return Err(FlowError::NotEligible(format!(
                    "claim transaction {tx_hash:?} was rejected by the contract"
                )));
            }
            info!(?account, ?tx_hash, block = ?receipt.block_number, "payout claim confirmed");
            Ok(ClaimReceipt {
                transaction_hash: tx_hash,
                account,
                block_number: receipt.block_number,
            })
        });

        task.await
            .map_err(|err| FlowError::TransactionFailed(format!("claim task failed: {err}")))?
    }
}

fn claim_error(err: WalletError) -> FlowError {
    match err {
        WalletError::Rejected(reason) => FlowError::UserRejected(reason),
        WalletError::Reverted(reason) => FlowError::NotEligible(reason),
        other => FlowError::TransactionFailed(other.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/payout_tests.rs"]
mod tests;
