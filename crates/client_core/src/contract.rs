//! Static interface of the insurance contract and a handle bound to its address.

use std::{fmt, sync::Arc};

use ethers::{
    abi::{AbiDecode, AbiEncode},
    contract::abigen,
    types::{Address, Bytes, TxHash, U256},
};
use shared::domain::RiskScore;

use crate::wallet::{TransactionReceipt, TransactionRequest, WalletError, WalletProvider};

abigen!(
    InsuranceVault,
    r#"[
        function calculatePremium(uint256 score) external view returns (uint256)
        function payPremium(uint256 score) external payable
        function claimPayout() external returns (uint256)
    ]"#
);

/// Handle to the deployed insurance contract. All traffic goes through the wallet provider.
#[derive(Clone)]
pub struct InsuranceContract {
    address: Address,
    wallet: Arc<dyn WalletProvider>,
}

impl fmt::Debug for InsuranceContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsuranceContract")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl InsuranceContract {
    pub fn new(address: Address, wallet: Arc<dyn WalletProvider>) -> Self {
        Self { address, wallet }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Read-only premium calculator; the contract's answer is the only source of truth.
    pub async fn calculate_premium(&self, score: RiskScore) -> Result<U256, WalletError> {
        let request = TransactionRequest {
            from: None,
            to: self.address,
            value: U256::zero(),
            data: Bytes::from(
                CalculatePremiumCall {
                    score: U256::from(score.value()),
                }
                .encode(),
            ),
        };
        let output = self.wallet.call(&request).await?;
        CalculatePremiumReturn::decode(&output)
            .map(|premium| premium.0)
            .map_err(|err| WalletError::InvalidResponse(format!("calculatePremium: {err}")))
    }

    pub fn pay_premium_request(
        &self,
        from: Address,
        score: RiskScore,
        value: U256,
    ) -> TransactionRequest {
        TransactionRequest {
            from: Some(from),
            to: self.address,
            value,
            data: Bytes::from(
                PayPremiumCall {
                    score: U256::from(score.value()),
                }
                .encode(),
            ),
        }
    }

    pub fn claim_payout_request(&self, from: Address) -> TransactionRequest {
        TransactionRequest {
            from: Some(from),
            to: self.address,
            value: U256::zero(),
            data: Bytes::from(ClaimPayoutCall.encode()),
        }
    }

    pub async fn submit(&self, request: &TransactionRequest) -> Result<TxHash, WalletError> {
        self.wallet.send_transaction(request).await
    }

    pub async fn confirm(&self, tx_hash: TxHash) -> Result<TransactionReceipt, WalletError> {
        self.wallet.wait_for_receipt(tx_hash).await
    }
}
