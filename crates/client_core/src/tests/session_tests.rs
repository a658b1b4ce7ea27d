use super::*;
use crate::test_support::{alice, bob, eventually, session_manager, FakeWallet};
use crate::wallet::MissingWalletProvider;

#[tokio::test]
async fn connect_binds_first_account_on_expected_chain() {
    let wallet = FakeWallet::new();
    wallet.set_accounts(vec![alice(), bob()]);
    let sessions = session_manager(&wallet);

    let session = sessions.connect().await.expect("connect");

    assert_eq!(session.account, alice());
    assert_eq!(session.chain_id, ChainId::SEPOLIA);
    assert_eq!(session.contract.address(), crate::test_support::contract_address());
    assert_eq!(
        sessions.current_session().map(|current| current.id),
        Some(session.id)
    );
}

#[tokio::test]
async fn missing_provider_reports_unavailable_and_stays_disconnected() {
    let sessions = SessionManager::new(
        Arc::new(MissingWalletProvider),
        Address::zero(),
        Some(ChainId::SEPOLIA),
    );

    assert_eq!(sessions.connect().await.err(), Some(FlowError::ProviderUnavailable));
    assert!(matches!(sessions.state(), SessionState::Disconnected));
    assert!(sessions.current_session().is_none());
}

#[tokio::test]
async fn connect_failures_are_classified() {
    let wallet = FakeWallet::new();
    let sessions = session_manager(&wallet);

    wallet.reject_access(true);
    assert!(matches!(
        sessions.connect().await,
        Err(FlowError::UserRejected(_))
    ));

    wallet.reject_access(false);
    wallet.set_accounts(Vec::new());
    assert!(matches!(
        sessions.connect().await,
        Err(FlowError::ConnectionError(_))
    ));

    wallet.set_accounts(vec![alice()]);
    wallet.set_chain(ChainId::MAINNET);
    let err = sessions.connect().await.expect_err("wrong network");
    assert!(matches!(&err, FlowError::ConnectionError(reason) if reason.contains("on chain 1,")));
    assert!(sessions.current_session().is_none());
}

#[tokio::test]
async fn reconnect_keeps_session_id_until_account_changes() {
    let wallet = FakeWallet::new();
    let sessions = session_manager(&wallet);

    let first = sessions.connect().await.expect("connect");
    let again = sessions.connect().await.expect("reconnect");
    assert_eq!(first.id, again.id);

    wallet.set_accounts(vec![bob()]);
    let rebound = sessions.connect().await.expect("rebind");
    assert_ne!(rebound.id, first.id);
    assert_eq!(rebound.account, bob());
    assert_eq!(sessions.ensure_current(&first), Err(FlowError::NoSession));
    assert_eq!(sessions.ensure_current(&rebound), Ok(()));
}

#[tokio::test]
async fn failed_rebind_drops_the_live_session() {
    let wallet = FakeWallet::new();
    let sessions = session_manager(&wallet);
    sessions.connect().await.expect("connect");

    wallet.reject_access(true);
    assert!(sessions.connect().await.is_err());
    assert!(sessions.current_session().is_none());
}

#[tokio::test]
async fn provider_notifications_invalidate_the_session() {
    let wallet = FakeWallet::new();
    let sessions = session_manager(&wallet);

    let session = sessions.connect().await.expect("connect");
    wallet.switch_account(bob());
    eventually(|| sessions.current_session().is_none()).await;
    assert_eq!(sessions.ensure_current(&session), Err(FlowError::NoSession));

    wallet.set_accounts(vec![alice()]);
    sessions.connect().await.expect("reconnect");
    wallet.emit(WalletEvent::ChainChanged(ChainId::MAINNET));
    eventually(|| sessions.current_session().is_none()).await;

    sessions.connect().await.expect("reconnect");
    wallet.emit(WalletEvent::Disconnected);
    eventually(|| sessions.current_session().is_none()).await;
}

#[tokio::test]
async fn unrelated_notifications_keep_the_session() {
    let wallet = FakeWallet::new();
    let sessions = session_manager(&wallet);
    let session = sessions.connect().await.expect("connect");
    let mut updates = sessions.subscribe();
    updates.borrow_and_update();

    // Same active account, reordered secondary accounts.
    wallet.emit(WalletEvent::AccountsChanged(vec![alice(), bob()]));
    wallet.emit(WalletEvent::ChainChanged(ChainId::SEPOLIA));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(!updates.has_changed().expect("sender alive"));
    assert_eq!(sessions.ensure_current(&session), Ok(()));
}

#[tokio::test]
async fn explicit_disconnect_is_observable() {
    let wallet = FakeWallet::new();
    let sessions = session_manager(&wallet);
    sessions.connect().await.expect("connect");
    let mut updates = sessions.subscribe();

    sessions.disconnect();

    updates.changed().await.expect("update");
    assert!(matches!(*updates.borrow(), SessionState::Disconnected));
}
