use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub mod config;
pub mod contract;
pub mod error;
pub mod flow;
pub mod inflight;
pub mod payout;
pub mod premium;
pub mod risk;
pub mod rpc_wallet;
pub mod session;
pub mod wallet;

pub use config::{load_settings, Settings};
pub use contract::InsuranceContract;
pub use error::{FlowError, Step, StepFailure};
pub use flow::{FlowController, FlowEvent, FlowSnapshot, FlowState};
pub use payout::{ClaimReceipt, PayoutOrchestrator};
pub use premium::{PaymentReceipt, PremiumOrchestrator, PremiumQuote};
pub use risk::{AssessmentHandle, RiskAssessment, RiskAssessmentClient};
pub use rpc_wallet::{JsonRpcWallet, JsonRpcWalletConfig};
pub use session::{Session, SessionManager, SessionState};
pub use wallet::{MissingWalletProvider, WalletError, WalletEvent, WalletProvider};

/// Wires a flow controller from settings. Must run inside a tokio runtime.
pub fn build_flow_controller(settings: &Settings) -> Result<Arc<FlowController>> {
    let endpoint = settings.scoring_endpoint_url()?;
    let contract_address = settings.contract_address()?;

    let wallet: Arc<dyn WalletProvider> = match settings.wallet_rpc_url.as_deref() {
        Some(rpc_url) => {
            info!(rpc_url, "using JSON-RPC wallet provider");
            let wallet = JsonRpcWallet::new(JsonRpcWalletConfig {
                rpc_url: rpc_url.to_string(),
                receipt_poll_interval: settings.receipt_poll_interval(),
                confirmation_timeout: settings.confirmation_timeout(),
                watch_interval: settings.watch_interval(),
            })
            .with_context(|| format!("invalid wallet rpc url: {rpc_url}"))?;
            wallet.start_change_watcher();
            wallet as Arc<dyn WalletProvider>
        }
        None => {
            warn!("no wallet RPC URL configured; wallet actions are unavailable");
            Arc::new(MissingWalletProvider)
        }
    };

    let sessions = SessionManager::new(wallet, contract_address, settings.expected_chain_id());
    let risk = RiskAssessmentClient::new(endpoint, settings.assess_timeout());
    Ok(FlowController::new(sessions, risk))
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
