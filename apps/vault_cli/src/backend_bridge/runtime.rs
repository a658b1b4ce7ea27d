//! Runtime bridge between the terminal command queue and the flow controller.

use std::{sync::Arc, thread};

use client_core::{build_flow_controller, FlowController, FlowEvent, Settings};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};

/// Starts the backend worker thread. It exits once every command sender is dropped.
pub fn launch(
    settings: Settings,
    cmd_rx: Receiver<BackendCommand>,
    ui_tx: Sender<UiEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::BackendStartup,
                    format!("failed to build backend runtime: {err}"),
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let flow = match build_flow_controller(&settings) {
                Ok(flow) => flow,
                Err(err) => {
                    let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                        UiErrorContext::BackendStartup,
                        format!("{err:#}"),
                    )));
                    tracing::error!("failed to build flow controller: {err:#}");
                    return;
                }
            };

            let forwarder = tokio::spawn(forward_flow_events(flow.subscribe(), ui_tx.clone()));
            let _ = ui_tx.try_send(UiEvent::Info(format!(
                "Ready. Scoring service: {}",
                settings.scoring_endpoint
            )));

            // Each command runs as its own task, so a slow confirmation never
            // blocks `status` or a superseding `assess`.
            while let Ok(cmd) = cmd_rx.recv() {
                let flow = Arc::clone(&flow);
                let ui_tx = ui_tx.clone();
                tokio::spawn(async move { run_command(&flow, cmd, &ui_tx).await });
            }

            flow.disconnect().await;
            forwarder.abort();
            tracing::debug!("backend command queue closed; worker exiting");
        });
    })
}

async fn run_command(flow: &FlowController, cmd: BackendCommand, ui_tx: &Sender<UiEvent>) {
    let name = cmd.name();
    // Outcomes reach the terminal as flow events; only the log sees them here.
    let outcome = match cmd {
        BackendCommand::Connect => flow.connect().await.map(|_| ()),
        BackendCommand::Assess { url } => flow.assess(&url).await.map(|_| ()),
        BackendCommand::Quote => flow.quote().await.map(|_| ()),
        BackendCommand::Pay => flow.pay().await.map(|_| ()),
        BackendCommand::Claim => flow.claim().await.map(|_| ()),
        BackendCommand::Disconnect => {
            flow.disconnect().await;
            Ok(())
        }
        BackendCommand::Status => {
            let _ = ui_tx.try_send(UiEvent::Status(flow.snapshot().await));
            Ok(())
        }
    };
    if let Err(failure) = outcome {
        tracing::debug!(command = name, code = %failure.code(), "command failed");
    }
}

async fn forward_flow_events(mut events: broadcast::Receiver<FlowEvent>, ui_tx: Sender<UiEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match ui_tx.try_send(UiEvent::Flow(event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("terminal event queue is full; dropping flow event");
                }
                Err(TrySendError::Disconnected(_)) => return,
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("terminal fell behind by {skipped} flow events");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
