//! Wallet provider backed by an Ethereum JSON-RPC endpoint that holds the keys
//! (a local signer, a dev node with unlocked accounts, or a wallet bridge).

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, PendingTransaction, Provider, ProviderError, RpcError},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes,
        TransactionRequest as EthTransactionRequest, TxHash, U64,
    },
};
use shared::domain::ChainId;
use tokio::{sync::broadcast, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::wallet::{
    TransactionReceipt, TransactionRequest, WalletError, WalletEvent, WalletProvider,
};

const METHOD_NOT_FOUND: i64 = -32601;
const USER_REJECTED: i64 = 4001;
/// Times a submitted transaction may be missing from the node before it counts as dropped.
const MEMPOOL_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct JsonRpcWalletConfig {
    pub rpc_url: String,
    pub receipt_poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub watch_interval: Duration,
}

pub struct JsonRpcWallet {
    provider: Provider<Http>,
    config: JsonRpcWalletConfig,
    events: broadcast::Sender<WalletEvent>,
    watcher: StdMutex<Option<JoinHandle<()>>>,
}

impl JsonRpcWallet {
    pub fn new(config: JsonRpcWalletConfig) -> Result<Arc<Self>, WalletError> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|err| WalletError::Rpc(err.to_string()))?
            .interval(config.receipt_poll_interval);
        let (events, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            provider,
            config,
            events,
            watcher: StdMutex::new(None),
        }))
    }

    /// Starts publishing account and chain changes. The endpoint has no push
    /// channel, so the watcher compares snapshots at `watch_interval`.
    pub fn start_change_watcher(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.is_some() {
            return;
        }
        *watcher = Some(tokio::spawn(watch_changes(
            Arc::downgrade(self),
            self.config.watch_interval,
        )));
    }
}

impl Drop for JsonRpcWallet {
    fn drop(&mut self) {
        if let Some(task) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[async_trait]
impl WalletProvider for JsonRpcWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        match self
            .provider
            .request::<_, Vec<Address>>("eth_requestAccounts", ())
            .await
        {
            Ok(accounts) => Ok(accounts),
            Err(err)
                if err
                    .as_error_response()
                    .is_some_and(|resp| resp.code == METHOD_NOT_FOUND) =>
            {
                debug!("eth_requestAccounts unsupported by endpoint; using eth_accounts");
                self.accounts().await
            }
            Err(err) => Err(classify_provider_error(err)),
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        self.provider
            .get_accounts()
            .await
            .map_err(classify_provider_error)
    }

    async fn chain_id(&self) -> Result<ChainId, WalletError> {
        let raw = self
            .provider
            .get_chainid()
            .await
            .map_err(classify_provider_error)?;
        u64::try_from(raw)
            .map(ChainId)
            .map_err(|err| WalletError::InvalidResponse(format!("chain id {raw}: {err}")))
    }

    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, WalletError> {
        self.provider
            .call(&typed_transaction(request), None)
            .await
            .map_err(classify_provider_error)
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, WalletError> {
        let pending = self
            .provider
            .send_transaction(typed_transaction(request), None)
            .await
            .map_err(classify_provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, WalletError> {
        let pending = PendingTransaction::new(tx_hash, &self.provider)
            .interval(self.config.receipt_poll_interval)
            .retries(MEMPOOL_RETRIES);
        let receipt = match time::timeout(self.config.confirmation_timeout, pending).await {
            Ok(result) => result.map_err(classify_provider_error)?,
            Err(_) => return Err(WalletError::ConfirmationTimeout(tx_hash)),
        };
        let receipt = receipt.ok_or(WalletError::Dropped(tx_hash))?;
        Ok(TransactionReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|block| block.as_u64()),
            // Pre-Byzantium receipts carry no status; inclusion counts as success.
            success: receipt.status.map_or(true, |status| status == U64::one()),
        })
    }

    fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

fn typed_transaction(request: &TransactionRequest) -> TypedTransaction {
    let mut tx = EthTransactionRequest::new()
        .to(request.to)
        .data(request.data.clone());
    if let Some(from) = request.from {
        tx = tx.from(from);
    }
    if !request.value.is_zero() {
        tx = tx.value(request.value);
    }
    tx.into()
}

/// Maps JSON-RPC error responses onto wallet outcomes; transport and decoding
/// failures keep their own kinds.
fn classify_provider_error(err: ProviderError) -> WalletError {
    if let Some(resp) = err.as_error_response() {
        let message = resp.message.clone();
        return if resp.code == USER_REJECTED {
            WalletError::Rejected(message)
        } else if resp.message.to_ascii_lowercase().contains("insufficient funds") {
            WalletError::InsufficientFunds(message)
        } else if resp.is_revert() {
            WalletError::Reverted(message)
        } else {
            WalletError::Rpc(format!("{}: {message}", resp.code))
        };
    }
    if err.as_serde_error().is_some() {
        return WalletError::InvalidResponse(err.to_string());
    }
    WalletError::Rpc(err.to_string())
}

async fn watch_changes(wallet: Weak<JsonRpcWallet>, interval: Duration) {
    let mut last_accounts: Option<Vec<Address>> = None;
    let mut last_chain: Option<ChainId> = None;
    let mut reachable = true;

    loop {
        let Some(wallet) = wallet.upgrade() else {
            return;
        };
        match tokio::try_join!(wallet.accounts(), wallet.chain_id()) {
            Ok((accounts, chain_id)) => {
                if !reachable {
                    info!("wallet endpoint reachable again");
                    reachable = true;
                }
                if last_accounts.as_ref().is_some_and(|last| *last != accounts) {
                    let _ = wallet
                        .events
                        .send(WalletEvent::AccountsChanged(accounts.clone()));
                }
                if last_chain.is_some_and(|last| last != chain_id) {
                    let _ = wallet.events.send(WalletEvent::ChainChanged(chain_id));
                }
                last_accounts = Some(accounts);
                last_chain = Some(chain_id);
            }
            Err(err) => {
                if reachable {
                    warn!("wallet endpoint unreachable: {err}");
                    let _ = wallet.events.send(WalletEvent::Disconnected);
                    reachable = false;
                }
                last_accounts = None;
                last_chain = None;
            }
        }
        drop(wallet);
        time::sleep(interval).await;
    }
}

#[cfg(test)]
#[path = "tests/rpc_wallet_tests.rs"]
mod tests;
