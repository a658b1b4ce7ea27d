use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex as StdMutex, PoisonError, Weak,
};

use ethers::types::Address;
use shared::domain::{ChainId, SessionId};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    contract::InsuranceContract,
    error::FlowError,
    wallet::{WalletError, WalletEvent, WalletProvider},
};

/// A bound wallet account plus the contract handle used on its behalf.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub chain_id: ChainId,
    pub account: Address,
    pub contract: InsuranceContract,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Connected(session) => Some(session),
            _ => None,
        }
    }
}

pub struct SessionManager {
    wallet: Arc<dyn WalletProvider>,
    contract_address: Address,
    expected_chain_id: Option<ChainId>,
    state: watch::Sender<SessionState>,
    next_session_id: AtomicU64,
    connect_lock: Mutex<()>,
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Must be called from within a tokio runtime: the manager subscribes to the
    /// provider's change notifications for as long as it lives.
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        contract_address: Address,
        expected_chain_id: Option<ChainId>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let events = wallet.subscribe_events();
        let manager = Arc::new(Self {
            wallet,
            contract_address,
            expected_chain_id,
            state,
            next_session_id: AtomicU64::new(1),
            connect_lock: Mutex::new(()),
            listener: StdMutex::new(None),
        });

        let task = tokio::spawn(listen_for_wallet_events(Arc::downgrade(&manager), events));
        *manager
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        manager
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Fails with `NoSession` unless `session` is still the live one.
    pub fn ensure_current(&self, session: &Session) -> Result<(), FlowError> {
        match self.state.borrow().session() {
            Some(current) if current.id == session.id && current.account == session.account => {
                Ok(())
            }
            _ => Err(FlowError::NoSession),
        }
    }

    pub async fn connect(&self) -> Result<Session, FlowError> {
        let _connecting = self.connect_lock.lock().await;
        let previous = self.current_session();
        if previous.is_none() {
            self.state.send_replace(SessionState::Connecting);
        }

        match self.bind(previous.as_ref()).await {
            Ok(session) => {
                info!(
                    account = ?session.account,
                    chain_id = %session.chain_id,
                    session_id = %session.id,
                    "wallet session established"
                );
                self.state
                    .send_replace(SessionState::Connected(session.clone()));
                Ok(session)
            }
            Err(err) => {
                warn!("wallet connect failed: {err}");
                self.state.send_replace(SessionState::Disconnected);
                Err(err)
            }
        }
    }

    pub fn disconnect(&self) {
        let previous = self.state.send_replace(SessionState::Disconnected);
        if let Some(session) = previous.session() {
            info!(account = ?session.account, session_id = %session.id, "wallet session closed");
        }
    }

    async fn bind(&self, previous: Option<&Session>) -> Result<Session, FlowError> {
        let accounts = self
            .wallet
            .request_accounts()
            .await
            .map_err(connect_error)?;
        let Some(account) = accounts.first().copied() else {
            return Err(FlowError::ConnectionError(
                "wallet returned no accounts".to_string(),
            ));
        };
        if accounts.len() > 1 {
            warn!(
                account = ?account,
                available = accounts.len(),
                "wallet exposes several accounts; binding the first"
            );
        }

        let chain_id = self.wallet.chain_id().await.map_err(connect_error)?;
        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(FlowError::ConnectionError(format!(
                    "wallet is on chain {chain_id}, expected chain {expected}"
                )));
            }
        }

        let id = match previous {
            Some(session) if session.account == account && session.chain_id == chain_id => {
                session.id
            }
            _ => SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed)),
        };

        Ok(Session {
            id,
            chain_id,
            account,
            contract: InsuranceContract::new(self.contract_address, Arc::clone(&self.wallet)),
        })
    }

    fn handle_wallet_event(&self, event: WalletEvent) {
        let invalidated = self.state.send_if_modified(|state| {
            let Some(session) = state.session() else {
                return false;
            };
            let stale = match &event {
                WalletEvent::AccountsChanged(accounts) => accounts.first() != Some(&session.account),
                WalletEvent::ChainChanged(chain_id) => *chain_id != session.chain_id,
                WalletEvent::Disconnected => true,
            };
            if stale {
                *state = SessionState::Disconnected;
            }
            stale
        });

        if invalidated {
            info!(?event, "wallet session invalidated by provider notification");
        } else {
            debug!(?event, "wallet notification did not affect the session");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn listen_for_wallet_events(
    manager: Weak<SessionManager>,
    mut events: broadcast::Receiver<WalletEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Missed notifications may have changed the account; treat as a disconnect.
                warn!("wallet notifications lagged by {skipped}; invalidating session");
                WalletEvent::Disconnected
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("wallet notification stream closed");
                return;
            }
        };
        let Some(manager) = manager.upgrade() else {
            return;
        };
        manager.handle_wallet_event(event);
    }
}

fn connect_error(err: WalletError) -> FlowError {
    match err {
        WalletError::Unavailable => FlowError::ProviderUnavailable,
        WalletError::Rejected(reason) => FlowError::UserRejected(reason),
        other => FlowError::ConnectionError(other.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
