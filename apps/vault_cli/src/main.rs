mod backend_bridge;
mod controller;

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    thread,
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::load_settings;
use crossbeam_channel::{bounded, Receiver};
use tracing_subscriber::EnvFilter;

use crate::backend_bridge::{commands::BackendCommand, runtime};
use crate::controller::{
    events::{render_event, UiEvent},
    orchestration::{dispatch_backend_command, parse_input, Input, HELP},
};

/// Terminal client for the URL risk insurance vault.
#[derive(Parser, Debug)]
struct Args {
    /// TOML settings file; defaults to ./vault.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    scoring_endpoint: Option<String>,
    /// JSON-RPC endpoint of a wallet that can sign for its accounts.
    #[arg(long)]
    wallet_rpc_url: Option<String>,
    #[arg(long)]
    contract_address: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref()).context("loading settings")?;
    if let Some(endpoint) = args.scoring_endpoint {
        settings.scoring_endpoint = endpoint;
    }
    if let Some(rpc_url) = args.wallet_rpc_url {
        settings.wallet_rpc_url = Some(rpc_url);
    }
    if let Some(address) = args.contract_address {
        settings.contract_address = address;
    }
    settings.validate().context("invalid command-line settings")?;

    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(32);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(256);
    let backend = runtime::launch(settings, cmd_rx, ui_tx);
    let printer = spawn_printer(ui_rx);

    println!("{HELP}");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        match parse_input(&line) {
            Ok(Input::Command(cmd)) => {
                let mut status = String::new();
                dispatch_backend_command(&cmd_tx, cmd, &mut status);
                if !status.is_empty() {
                    eprintln!("{status}");
                }
            }
            Ok(Input::Help) => println!("{HELP}"),
            Ok(Input::Quit) => break,
            Ok(Input::Empty) => {}
            Err(message) => eprintln!("{message}"),
        }
        io::stdout().flush().context("flushing stdout")?;
    }

    drop(cmd_tx);
    if backend.join().is_err() {
        tracing::error!("backend worker panicked");
    }
    let _ = printer.join();
    Ok(())
}

fn spawn_printer(ui_rx: Receiver<UiEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(event) = ui_rx.recv() {
            if let Some(line) = render_event(&event) {
                println!("{line}");
            }
        }
    })
}
