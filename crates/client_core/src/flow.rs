//! Top-level connect → assess → pay → claim state machine.
//!
//! The controller owns the user-visible flow state and the context derived in
//! the current session (assessment, payment). Any session invalidation drops
//! that context and forces `Disconnected`; results that land after their
//! session or request was superseded are discarded.

use std::{
    fmt,
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
};

use ethers::types::Address;
use shared::domain::{ChainId, RequestId, SessionId};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, info, warn};

use crate::{
    error::{FlowError, Step, StepFailure},
    inflight::InflightRegistry,
    payout::{ClaimReceipt, PayoutOrchestrator},
    premium::{PaymentReceipt, PremiumOrchestrator, PremiumQuote},
    risk::{normalize_target, AssessmentHandle, RiskAssessment, RiskAssessmentClient},
    session::{Session, SessionManager, SessionState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Disconnected,
    Connected,
    Assessing,
    Assessed,
    Paying,
    Paid,
    Claiming,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Assessing => "assessing",
            Self::Assessed => "assessed",
            Self::Paying => "paying",
            Self::Paid => "paid",
            Self::Claiming => "claiming",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub enum FlowEvent {
    StateChanged(FlowState),
    Connected { account: Address, chain_id: ChainId },
    SessionLost,
    AssessmentReady(RiskAssessment),
    PremiumQuoted(PremiumQuote),
    PaymentConfirmed(PaymentReceipt),
    PayoutClaimed(ClaimReceipt),
    StepFailed(StepFailure),
}

#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub state: FlowState,
    pub account: Option<Address>,
    pub chain_id: Option<ChainId>,
    pub assessment: Option<RiskAssessment>,
    pub payment: Option<PaymentReceipt>,
    pub pending_request: Option<RequestId>,
}

struct PendingAssessment {
    request_id: RequestId,
    abort: AbortHandle,
    resume: FlowState,
}

struct FlowContext {
    state: FlowState,
    session: Option<Session>,
    assessment: Option<RiskAssessment>,
    payment: Option<PaymentReceipt>,
    assessing: Option<PendingAssessment>,
}

impl FlowContext {
    fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }
}

pub struct FlowController {
    me: Weak<FlowController>,
    sessions: Arc<SessionManager>,
    risk: RiskAssessmentClient,
    premium: PremiumOrchestrator,
    payout: PayoutOrchestrator,
    inner: Mutex<FlowContext>,
    events: broadcast::Sender<FlowEvent>,
    session_watch: StdMutex<Option<JoinHandle<()>>>,
}

impl FlowController {
    pub fn new(sessions: Arc<SessionManager>, risk: RiskAssessmentClient) -> Arc<Self> {
        let inflight = InflightRegistry::default();
        let (events, _) = broadcast::channel(256);
        let session_updates = sessions.subscribe();
        let controller = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            premium: PremiumOrchestrator::new(Arc::clone(&sessions), inflight.clone()),
            payout: PayoutOrchestrator::new(Arc::clone(&sessions), inflight),
            sessions,
            risk,
            inner: Mutex::new(FlowContext {
                state: FlowState::Disconnected,
                session: None,
                assessment: None,
                payment: None,
                assessing: None,
            }),
            events,
            session_watch: StdMutex::new(None),
        });

        let task = tokio::spawn(watch_sessions(Arc::downgrade(&controller), session_updates));
        *controller
            .session_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn state(&self) -> FlowState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> FlowSnapshot {
        let ctx = self.inner.lock().await;
        FlowSnapshot {
            state: ctx.state,
            account: ctx.session.as_ref().map(|session| session.account),
            chain_id: ctx.session.as_ref().map(|session| session.chain_id),
            assessment: ctx.assessment.clone(),
            payment: ctx.payment.clone(),
            pending_request: ctx.assessing.as_ref().map(|pending| pending.request_id),
        }
    }

    pub async fn connect(&self) -> Result<Session, StepFailure> {
        match self.sessions.connect().await {
            Ok(session) => {
                let mut ctx = self.inner.lock().await;
                self.adopt_session(&mut ctx, &session);
                Ok(session)
            }
            Err(error) => {
                let mut ctx = self.inner.lock().await;
                self.sync_session(&mut ctx);
                Err(self.fail(Step::Connect, error))
            }
        }
    }

    pub async fn disconnect(&self) {
        self.sessions.disconnect();
        let mut ctx = self.inner.lock().await;
        self.drop_session(&mut ctx);
    }

    /// Assesses `url`, superseding any assessment still in flight.
    pub async fn assess(&self, url: &str) -> Result<RiskAssessment, StepFailure> {
        if let Err(error) = normalize_target(url) {
            return Err(self.fail(Step::Assess, error));
        }
        let Some(controller) = self.me.upgrade() else {
            return Err(self.fail(Step::Assess, FlowError::NoSession));
        };
        let (handle, session_id) = {
            let mut ctx = self.inner.lock().await;
            self.sync_session(&mut ctx);
            let Some(session_id) = ctx.session_id() else {
                return Err(self.fail(Step::Assess, FlowError::NoSession));
            };
            let resume = match ctx.state {
                FlowState::Connected | FlowState::Assessed | FlowState::Paid => ctx.state,
                FlowState::Assessing => ctx
                    .assessing
                    .as_ref()
                    .map(|pending| pending.resume)
                    .unwrap_or(FlowState::Connected),
                FlowState::Paying => {
                    return Err(self.fail(Step::Assess, FlowError::AlreadyPending(Step::Pay)))
                }
                FlowState::Claiming => {
                    return Err(self.fail(Step::Assess, FlowError::AlreadyPending(Step::Claim)))
                }
                FlowState::Disconnected => {
                    return Err(self.fail(Step::Assess, FlowError::NoSession))
                }
            };

            let handle = self.risk.start(url);
            let pending = PendingAssessment {
                request_id: handle.request_id(),
                abort: handle.abort_handle(),
                resume,
            };
            // A superseded request keeps running for its own caller; its result
            // is simply never applied to the flow.
            if let Some(previous) = ctx.assessing.replace(pending) {
                debug!(
                    superseded = %previous.request_id,
                    request_id = %handle.request_id(),
                    "superseding in-flight assessment"
                );
            }
            self.set_state(&mut ctx, FlowState::Assessing);
            (handle, session_id)
        };

        // Settled by its own task: the flow leaves `Assessing` even if the
        // caller stops waiting.
        tokio::spawn(async move { controller.settle_assessment(handle, session_id).await })
            .await
            .map_err(|err| {
                self.fail(
                    Step::Assess,
                    FlowError::AssessmentUnavailable(format!("assessment task failed: {err}")),
                )
            })?
    }

    async fn settle_assessment(
        &self,
        handle: AssessmentHandle,
        session_id: SessionId,
    ) -> Result<RiskAssessment, StepFailure> {
        let request_id = handle.request_id();
        let result = handle.result().await;

        let mut ctx = self.inner.lock().await;
        self.sync_session(&mut ctx);
        if ctx.session_id() != Some(session_id) {
            debug!(request_id = %request_id, "discarding assessment from a closed session");
            return Err(self.fail(Step::Assess, FlowError::NoSession));
        }
        let is_latest = ctx
            .assessing
            .as_ref()
            .is_some_and(|pending| pending.request_id == request_id);
        if !is_latest {
            debug!(request_id = %request_id, "assessment superseded; result not applied");
            return result.map_err(|error| StepFailure::new(Step::Assess, error));
        }

        let resume = ctx
            .assessing
            .take()
            .map(|pending| pending.resume)
            .unwrap_or(FlowState::Connected);
        match result {
            Ok(assessment) => {
                ctx.assessment = Some(assessment.clone());
                ctx.payment = None;
                self.set_state(&mut ctx, FlowState::Assessed);
                self.emit(FlowEvent::AssessmentReady(assessment.clone()));
                Ok(assessment)
            }
            Err(error) => {
                self.set_state(&mut ctx, resume);
                Err(self.fail(Step::Assess, error))
            }
        }
    }

    /// Current premium for the current assessment, read from the contract now.
    pub async fn quote(&self) -> Result<PremiumQuote, StepFailure> {
        let (session, assessment) = {
            let mut ctx = self.inner.lock().await;
            self.sync_session(&mut ctx);
            let Some(session) = ctx.session.clone() else {
                return Err(self.fail(Step::Quote, FlowError::NoSession));
            };
            let Some(assessment) = ctx.assessment.clone() else {
                return Err(self.fail(Step::Quote, FlowError::NoAssessment));
            };
            (session, assessment)
        };

        match self.premium.quote(&session, &assessment).await {
            Ok(quote) => {
                self.emit(FlowEvent::PremiumQuoted(quote.clone()));
                Ok(quote)
            }
            Err(error) => {
                let mut ctx = self.inner.lock().await;
                self.sync_session(&mut ctx);
                Err(self.fail(Step::Quote, error))
            }
        }
    }

    /// Derives a fresh quote and pays it. Only legal from `Assessed`.
    pub async fn pay(&self) -> Result<PaymentReceipt, StepFailure> {
        let Some(controller) = self.me.upgrade() else {
            return Err(self.fail(Step::Pay, FlowError::NoSession));
        };
        let (session, assessment) = {
            let mut ctx = self.inner.lock().await;
            self.sync_session(&mut ctx);
            let Some(session) = ctx.session.clone() else {
                return Err(self.fail(Step::Pay, FlowError::NoSession));
            };
            match ctx.state {
                FlowState::Assessed => {}
                FlowState::Paying => {
                    return Err(self.fail(Step::Pay, FlowError::AlreadyPending(Step::Pay)))
                }
                FlowState::Claiming => {
                    return Err(self.fail(Step::Pay, FlowError::AlreadyPending(Step::Claim)))
                }
                FlowState::Paid => {
                    return Err(self.fail(
                        Step::Pay,
                        FlowError::StaleQuote(
                            "premium for this assessment is already paid; assess again first"
                                .to_string(),
                        ),
                    ))
                }
                FlowState::Connected | FlowState::Assessing | FlowState::Disconnected => {
                    return Err(self.fail(Step::Pay, FlowError::NoAssessment))
                }
            }
            let Some(assessment) = ctx.assessment.clone() else {
                return Err(self.fail(Step::Pay, FlowError::NoAssessment));
            };
            self.set_state(&mut ctx, FlowState::Paying);
            (session, assessment)
        };

        // The outcome is applied by the settling task, so the flow reaches
        // `Paid` or falls back to `Assessed` even if this caller stops waiting.
        match tokio::spawn(async move { controller.settle_payment(session, assessment).await })
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut ctx = self.inner.lock().await;
                if ctx.state == FlowState::Paying {
                    self.set_state(&mut ctx, FlowState::Assessed);
                }
                Err(self.fail(
                    Step::Pay,
                    FlowError::TransactionFailed(format!("payment task failed: {err}")),
                ))
            }
        }
    }

    async fn settle_payment(
        &self,
        session: Session,
        assessment: RiskAssessment,
    ) -> Result<PaymentReceipt, StepFailure> {
        let outcome = match self.premium.quote(&session, &assessment).await {
            Ok(quote) => {
                self.emit(FlowEvent::PremiumQuoted(quote.clone()));
                self.premium.pay(&session, &quote).await
            }
            Err(error) => Err(error),
        };

        let mut ctx = self.inner.lock().await;
        self.sync_session(&mut ctx);
        if ctx.session_id() != Some(session.id) {
            // The payment may still have landed; report it, but it no longer
            // belongs to any flow context.
            warn!(account = ?session.account, "session ended while payment was pending");
            return match outcome {
                Ok(receipt) => {
                    self.emit(FlowEvent::PaymentConfirmed(receipt.clone()));
                    Ok(receipt)
                }
                Err(error) => Err(self.fail(Step::Pay, error)),
            };
        }

        match outcome {
            Ok(receipt) => {
                ctx.payment = Some(receipt.clone());
                self.set_state(&mut ctx, FlowState::Paid);
                self.emit(FlowEvent::PaymentConfirmed(receipt.clone()));
                Ok(receipt)
            }
            Err(error) => {
                self.set_state(&mut ctx, FlowState::Assessed);
                Err(self.fail(Step::Pay, error))
            }
        }
    }

    /// Claims a payout. Only legal from `Paid` in the current session.
    pub async fn claim(&self) -> Result<ClaimReceipt, StepFailure> {
        let Some(controller) = self.me.upgrade() else {
            return Err(self.fail(Step::Claim, FlowError::NoSession));
        };
        let session = {
            let mut ctx = self.inner.lock().await;
            self.sync_session(&mut ctx);
            let Some(session) = ctx.session.clone() else {
                return Err(self.fail(Step::Claim, FlowError::NoSession));
            };
            match ctx.state {
                FlowState::Paid => {}
                FlowState::Claiming => {
                    return Err(self.fail(Step::Claim, FlowError::AlreadyPending(Step::Claim)))
                }
                FlowState::Paying => {
                    return Err(self.fail(Step::Claim, FlowError::AlreadyPending(Step::Pay)))
                }
                _ => return Err(self.fail(Step::Claim, FlowError::NotPaid)),
            }
            self.set_state(&mut ctx, FlowState::Claiming);
            session
        };

        match tokio::spawn(async move { controller.settle_claim(session).await }).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut ctx = self.inner.lock().await;
                if ctx.state == FlowState::Claiming {
                    self.set_state(&mut ctx, FlowState::Paid);
                }
                Err(self.fail(
                    Step::Claim,
                    FlowError::TransactionFailed(format!("claim task failed: {err}")),
                ))
            }
        }
    }

    async fn settle_claim(&self, session: Session) -> Result<ClaimReceipt, StepFailure> {
        let outcome = self.payout.claim(&session).await;

        let mut ctx = self.inner.lock().await;
        self.sync_session(&mut ctx);
        if ctx.session_id() == Some(session.id) {
            self.set_state(&mut ctx, FlowState::Paid);
        } else {
            warn!(account = ?session.account, "session ended while claim was pending");
        }
        match outcome {
            Ok(receipt) => {
                self.emit(FlowEvent::PayoutClaimed(receipt.clone()));
                Ok(receipt)
            }
            Err(error) => Err(self.fail(Step::Claim, error)),
        }
    }

    fn on_session_state(&self, ctx: &mut FlowContext, state: &SessionState) {
        match state.session() {
            Some(session) => self.adopt_session(ctx, session),
            None => self.drop_session(ctx),
        }
    }

    /// Applies the session manager's current view before acting, so an
    /// invalidation is honoured even if its notification is still queued.
    fn sync_session(&self, ctx: &mut FlowContext) {
        let state = self.sessions.state();
        self.on_session_state(ctx, &state);
    }

    fn adopt_session(&self, ctx: &mut FlowContext, session: &Session) {
        if ctx.session_id() == Some(session.id) {
            return;
        }
        if ctx.session.is_some() {
            self.drop_session(ctx);
        }
        ctx.session = Some(session.clone());
        self.set_state(ctx, FlowState::Connected);
        self.emit(FlowEvent::Connected {
            account: session.account,
            chain_id: session.chain_id,
        });
    }

    fn drop_session(&self, ctx: &mut FlowContext) {
        let had_session = ctx.session.take().is_some();
        if let Some(pending) = ctx.assessing.take() {
            pending.abort.abort();
        }
        ctx.assessment = None;
        ctx.payment = None;
        self.set_state(ctx, FlowState::Disconnected);
        if had_session {
            info!("flow reset: wallet session ended");
            self.emit(FlowEvent::SessionLost);
        }
    }

    fn set_state(&self, ctx: &mut FlowContext, next: FlowState) {
        if ctx.state == next {
            return;
        }
        debug!(from = %ctx.state, to = %next, "flow state transition");
        ctx.state = next;
        self.emit(FlowEvent::StateChanged(next));
    }

    fn fail(&self, step: Step, error: FlowError) -> StepFailure {
        let failure = StepFailure::new(step, error);
        warn!(step = %step, code = %failure.code(), "{failure}");
        self.emit(FlowEvent::StepFailed(failure.clone()));
        failure
    }

    fn emit(&self, event: FlowEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for FlowController {
    fn drop(&mut self) {
        if let Some(task) = self
            .session_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn watch_sessions(controller: Weak<FlowController>, mut updates: watch::Receiver<SessionState>) {
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        if matches!(state, SessionState::Connecting) {
            continue;
        }
        let Some(controller) = controller.upgrade() else {
            return;
        };
        let mut ctx = controller.inner.lock().await;
        controller.on_session_state(&mut ctx, &state);
    }
}

#[cfg(test)]
#[path = "tests/flow_tests.rs"]
mod tests;
