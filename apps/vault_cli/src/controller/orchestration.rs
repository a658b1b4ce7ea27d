//! Command orchestration from terminal input to the backend command queue.

use crossbeam_channel::{Sender, TrySendError};

use crate::backend_bridge::commands::BackendCommand;

pub const HELP: &str = "\
commands:
  connect          connect the wallet and bind its first account
  assess <url>     score a URL with the risk assessment service
  quote            show the premium for the current assessment
  pay              pay the premium for the current assessment
  claim            claim the payout after paying
  disconnect       drop the wallet session
  status           show the current flow state
  help             show this list
  quit             exit";

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(BackendCommand),
    Help,
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "" => return Ok(Input::Empty),
        "help" | "?" => return Ok(Input::Help),
        "quit" | "exit" => return Ok(Input::Quit),
        "connect" => BackendCommand::Connect,
        // An empty URL is passed through so the flow reports it as a failed step.
        "assess" => BackendCommand::Assess {
            url: rest.to_string(),
        },
        "quote" => BackendCommand::Quote,
        "pay" => BackendCommand::Pay,
        "claim" => BackendCommand::Claim,
        "disconnect" => BackendCommand::Disconnect,
        "status" => BackendCommand::Status,
        other => return Err(format!("unknown command '{other}'; type `help`")),
    };

    if !rest.is_empty() && !matches!(command, BackendCommand::Assess { .. }) {
        return Err(format!("usage: `{}` takes no arguments", command.name()));
    }
    Ok(Input::Command(command))
}

pub fn dispatch_backend_command(
    cmd_tx: &Sender<BackendCommand>,
    cmd: BackendCommand,
    status: &mut String,
) {
    let cmd_name = cmd.name();
    match cmd_tx.try_send(cmd) {
        Ok(()) => tracing::debug!(command = cmd_name, "queued cli->backend command"),
        Err(TrySendError::Full(_)) => {
            *status = "Command queue is full; please retry".to_string();
        }
        Err(TrySendError::Disconnected(_)) => {
            *status =
                "Backend command processor disconnected (possible startup/runtime failure); restart the client"
                    .to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(
            parse_input("  assess   https://example.com  "),
            Ok(Input::Command(BackendCommand::Assess {
                url: "https://example.com".into()
            }))
        );
        assert_eq!(parse_input("PAY"), Ok(Input::Command(BackendCommand::Pay)));
        assert_eq!(parse_input(""), Ok(Input::Empty));
        assert_eq!(parse_input("quit"), Ok(Input::Quit));
        assert_eq!(
            parse_input("assess"),
            Ok(Input::Command(BackendCommand::Assess { url: String::new() }))
        );
    }

    #[test]
    fn rejects_unknown_commands_and_stray_arguments() {
        assert!(parse_input("refund").is_err());
        assert!(parse_input("claim now").is_err());
    }

    #[test]
    fn reports_full_and_closed_queues() {
        let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(1);
        let mut status = String::new();

        dispatch_backend_command(&cmd_tx, BackendCommand::Connect, &mut status);
        assert!(status.is_empty());
        dispatch_backend_command(&cmd_tx, BackendCommand::Pay, &mut status);
        assert!(status.contains("full"));

        drop(cmd_rx);
        dispatch_backend_command(&cmd_tx, BackendCommand::Claim, &mut status);
        assert!(status.contains("disconnected"));
    }
}
