use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    types::{Address, Bytes, TxHash, U256},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use shared::{domain::ChainId, protocol::AssessRiskRequest};
use tokio::{net::TcpListener, sync::broadcast};
use url::Url;

use crate::{
    contract::{CalculatePremiumCall, CalculatePremiumReturn, ClaimPayoutCall},
    flow::FlowController,
    risk::RiskAssessmentClient,
    session::SessionManager,
    wallet::{TransactionReceipt, TransactionRequest, WalletError, WalletEvent, WalletProvider},
};

pub(crate) const PREMIUM_PER_POINT_WEI: u64 = 1_000_000_000_000;

pub(crate) fn contract_address() -> Address {
    Address::repeat_byte(0xc0)
}

pub(crate) fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub(crate) fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

/// In-memory wallet: premium is `score * premium_per_point`, transactions are
/// recorded and confirmed after `confirm_delay`.
pub(crate) struct FakeWallet {
    accounts: Mutex<Vec<Address>>,
    chain_id: Mutex<ChainId>,
    reject_access: AtomicBool,
    premium_per_point: Mutex<U256>,
    call_error: Mutex<Option<WalletError>>,
    send_error: Mutex<Option<WalletError>>,
    confirm_delay: Mutex<Duration>,
    claim_eligible: AtomicBool,
    sent: Mutex<Vec<TransactionRequest>>,
    submitted: Mutex<HashMap<TxHash, TransactionRequest>>,
    next_tx: AtomicU64,
    premium_calls: AtomicUsize,
    events: broadcast::Sender<WalletEvent>,
}

impl FakeWallet {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            accounts: Mutex::new(vec![alice()]),
            chain_id: Mutex::new(ChainId::SEPOLIA),
            reject_access: AtomicBool::new(false),
            premium_per_point: Mutex::new(U256::from(PREMIUM_PER_POINT_WEI)),
            call_error: Mutex::new(None),
            send_error: Mutex::new(None),
            confirm_delay: Mutex::new(Duration::ZERO),
            claim_eligible: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            submitted: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(1),
            premium_calls: AtomicUsize::new(0),
            events,
        })
    }

    pub(crate) fn set_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock().expect("accounts") = accounts;
    }

    pub(crate) fn set_chain(&self, chain_id: ChainId) {
        *self.chain_id.lock().expect("chain") = chain_id;
    }

    pub(crate) fn reject_access(&self, reject: bool) {
        self.reject_access.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn set_premium_per_point(&self, wei: u64) {
        *self.premium_per_point.lock().expect("premium") = U256::from(wei);
    }

    pub(crate) fn fail_calls_with(&self, error: WalletError) {
        *self.call_error.lock().expect("call error") = Some(error);
    }

    pub(crate) fn fail_sends_with(&self, error: WalletError) {
        *self.send_error.lock().expect("send error") = Some(error);
    }

    pub(crate) fn set_confirm_delay(&self, delay: Duration) {
        *self.confirm_delay.lock().expect("delay") = delay;
    }

    pub(crate) fn set_claim_eligible(&self, eligible: bool) {
        self.claim_eligible.store(eligible, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<TransactionRequest> {
        self.sent.lock().expect("sent").clone()
    }

    pub(crate) fn premium_calls(&self) -> usize {
        self.premium_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn premium_for(&self, score: u8) -> U256 {
        *self.premium_per_point.lock().expect("premium") * U256::from(score)
    }

    /// Switches the active account and notifies subscribers.
    pub(crate) fn switch_account(&self, account: Address) {
        self.set_accounts(vec![account]);
        let _ = self
            .events
            .send(WalletEvent::AccountsChanged(vec![account]));
    }

    pub(crate) fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        if self.reject_access.load(Ordering::SeqCst) {
            return Err(WalletError::Rejected("user denied account access".into()));
        }
        self.accounts().await
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        Ok(self.accounts.lock().expect("accounts").clone())
    }

    async fn chain_id(&self) -> Result<ChainId, WalletError> {
        Ok(*self.chain_id.lock().expect("chain"))
    }

    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, WalletError> {
        if let Some(error) = self.call_error.lock().expect("call error").clone() {
            return Err(error);
        }
        let Ok(CalculatePremiumCall { score }) = CalculatePremiumCall::decode(&request.data) else {
            return Err(WalletError::Reverted("unknown view function".into()));
        };
        self.premium_calls.fetch_add(1, Ordering::SeqCst);
        let premium = *self.premium_per_point.lock().expect("premium") * score;
        Ok(Bytes::from(CalculatePremiumReturn(premium).encode()))
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, WalletError> {
        self.sent.lock().expect("sent").push(request.clone());
        if let Some(error) = self.send_error.lock().expect("send error").clone() {
            return Err(error);
        }
        let tx_hash = TxHash::from_low_u64_be(self.next_tx.fetch_add(1, Ordering::SeqCst));
        self.submitted
            .lock()
            .expect("submitted")
            .insert(tx_hash, request.clone());
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, WalletError> {
        let delay = *self.confirm_delay.lock().expect("delay");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let request = self
            .submitted
            .lock()
            .expect("submitted")
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| WalletError::InvalidResponse(format!("unknown tx {tx_hash:?}")))?;
        let is_claim = ClaimPayoutCall::decode(&request.data).is_ok();
        let success = !is_claim || self.claim_eligible.load(Ordering::SeqCst);
        Ok(TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(100 + self.next_tx.load(Ordering::SeqCst)),
            success,
        })
    }

    fn subscribe_events(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[derive(Clone)]
pub(crate) enum ScoringReply {
    Score(i64),
    Status(u16),
    Body(&'static str),
}

#[derive(Clone)]
struct ScoringState {
    reply: ScoringReply,
    overrides: Arc<HashMap<String, i64>>,
    delays: Arc<HashMap<String, Duration>>,
    hits: Arc<AtomicUsize>,
}

pub(crate) struct ScoringServer {
    pub endpoint: Url,
    pub hits: Arc<AtomicUsize>,
}

impl ScoringServer {
    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub(crate) async fn spawn_scoring_server(reply: ScoringReply) -> ScoringServer {
    spawn_scoring_server_with(reply, &[], &[]).await
}

/// `overrides` pins a score per URL; `delays` holds the reply for a URL back.
pub(crate) async fn spawn_scoring_server_with(
    reply: ScoringReply,
    overrides: &[(&str, i64)],
    delays: &[(&str, Duration)],
) -> ScoringServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = ScoringState {
        reply,
        overrides: Arc::new(
            overrides
                .iter()
                .map(|(url, score)| (url.to_string(), *score))
                .collect(),
        ),
        delays: Arc::new(
            delays
                .iter()
                .map(|(url, delay)| (url.to_string(), *delay))
                .collect(),
        ),
        hits: Arc::clone(&hits),
    };
    let app = Router::new()
        .route("/assess-risk", post(assess_risk))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    ScoringServer {
        endpoint: Url::parse(&format!("http://{addr}/assess-risk")).expect("endpoint"),
        hits,
    }
}

async fn assess_risk(
    State(state): State<ScoringState>,
    Json(request): Json<AssessRiskRequest>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = state.delays.get(&request.url) {
        tokio::time::sleep(*delay).await;
    }

    match state.reply {
        ScoringReply::Score(default) => {
            let score = state.overrides.get(&request.url).copied().unwrap_or(default);
            Json(json!({
                "url": request.url,
                "score": score,
                "checks": { "https": true, "ssl_version": "TLSv1.3", "status_code": 200 },
                "message": "Risk assessment completed",
            }))
            .into_response()
        }
        ScoringReply::Status(code) => (
            StatusCode::from_u16(code).expect("status"),
            "scoring backend failure",
        )
            .into_response(),
        ScoringReply::Body(body) => (
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
    }
}

pub(crate) fn session_manager(wallet: &Arc<FakeWallet>) -> Arc<SessionManager> {
    SessionManager::new(
        Arc::clone(wallet) as Arc<dyn WalletProvider>,
        contract_address(),
        Some(ChainId::SEPOLIA),
    )
}

pub(crate) fn flow_controller(wallet: &Arc<FakeWallet>, endpoint: Url) -> Arc<FlowController> {
    FlowController::new(
        session_manager(wallet),
        RiskAssessmentClient::new(endpoint, Duration::from_secs(5)),
    )
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
