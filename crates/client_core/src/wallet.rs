//! Injected wallet provider boundary.
//!
//! Everything that touches keys, signing, gas or the network goes through a
//! [`WalletProvider`]. The orchestration core never talks to a node directly.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TxHash, U256};
use shared::domain::ChainId;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet provider unavailable")]
    Unavailable,
    #[error("user rejected the request: {0}")]
    Rejected(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("transaction {0:?} was not confirmed in time")]
    ConfirmationTimeout(TxHash),
    #[error("transaction {0:?} was dropped before inclusion")]
    Dropped(TxHash),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("wallet rpc error: {0}")]
    Rpc(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// Change notifications pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// New account list; the first entry is the active account. Empty means access was revoked.
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    Disconnected,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError>;
    async fn accounts(&self) -> Result<Vec<Address>, WalletError>;
    async fn chain_id(&self) -> Result<ChainId, WalletError>;
    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, WalletError>;
    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, WalletError>;
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, WalletError>;
    fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Stand-in used when no wallet provider is configured.
pub struct MissingWalletProvider;

#[async_trait]
impl WalletProvider for MissingWalletProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        Err(WalletError::Unavailable)
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        Err(WalletError::Unavailable)
    }

    async fn chain_id(&self) -> Result<ChainId, WalletError> {
        Err(WalletError::Unavailable)
    }

    async fn call(&self, _request: &TransactionRequest) -> Result<Bytes, WalletError> {
        Err(WalletError::Unavailable)
    }

    async fn send_transaction(&self, _request: &TransactionRequest) -> Result<TxHash, WalletError> {
        Err(WalletError::Unavailable)
    }

    async fn wait_for_receipt(&self, _tx_hash: TxHash) -> Result<TransactionReceipt, WalletError> {
        Err(WalletError::Unavailable)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent> {
        // Nothing will ever be published; the receiver reports the channel as closed.
        broadcast::channel(1).1
    }
}
