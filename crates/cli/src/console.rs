//! Cellular leg driven from the terminal
//!
//! Without a modem, the person at the keyboard plays the cellular network:
//! `ring <number>` announces an incoming call, `active` connects it, `end`
//! drops it. Requests from the orchestrator (answer, reject, dial,
//! disconnect) are printed and reflected into the simulated call state.

use std::sync::Arc;

use async_trait::async_trait;
use cellgate_call_engine::{BridgeOrchestrator, CellularCallState, CellularEvent, CellularLeg};
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A line typed at the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Simulate an incoming cellular call
    Ring(String),
    /// The simulated cellular call connected
    Active,
    /// The simulated cellular call ended remotely
    End,
    /// Ask the gateway to dial out on the cellular leg
    Dial(String),
    /// Hang up whatever call is in progress
    Hangup,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: ring <number> | active | end | dial <number> | hangup | status | help | quit";

/// Parse one console line; blank lines yield `Ok(None)`
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();
    let command = match (verb.to_ascii_lowercase().as_str(), argument) {
        ("ring", Some(number)) => ConsoleCommand::Ring(number.to_string()),
        ("dial", Some(number)) => ConsoleCommand::Dial(number.to_string()),
        ("ring" | "dial", None) => return Err(format!("{} needs a number", verb)),
        ("active" | "answer", _) => ConsoleCommand::Active,
        ("end", _) => ConsoleCommand::End,
        ("hangup" | "bye", _) => ConsoleCommand::Hangup,
        ("status", _) => ConsoleCommand::Status,
        ("help" | "?", _) => ConsoleCommand::Help,
        ("quit" | "exit", _) => ConsoleCommand::Quit,
        _ => return Err(format!("unknown command '{}'", verb)),
    };
    Ok(Some(command))
}

/// Simulated cellular leg
#[derive(Debug)]
pub struct ConsoleCellular {
    state: Mutex<CellularCallState>,
    events: mpsc::UnboundedSender<CellularEvent>,
}

impl ConsoleCellular {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CellularEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let leg = Arc::new(Self {
            state: Mutex::new(CellularCallState::Idle),
            events,
        });
        (leg, rx)
    }

    pub fn state(&self) -> CellularCallState {
        *self.state.lock()
    }

    fn emit(&self, event: CellularEvent) {
        if self.events.send(event).is_err() {
            warn!("cellular event dropped, orchestrator gone");
        }
    }

    /// Apply a network-side action typed at the console
    fn network(&self, command: &ConsoleCommand) -> Result<(), String> {
        let mut state = self.state.lock();
        match command {
            ConsoleCommand::Ring(number) => {
                if *state != CellularCallState::Idle {
                    return Err(format!("cellular leg is {:?}", *state));
                }
                *state = CellularCallState::Ringing;
                drop(state);
                self.emit(CellularEvent::IncomingCall {
                    number: number.clone(),
                });
            }
            ConsoleCommand::Active => {
                if !matches!(*state, CellularCallState::Dialing | CellularCallState::Alerting) {
                    return Err(format!("nothing to connect, cellular leg is {:?}", *state));
                }
                *state = CellularCallState::Active;
                drop(state);
                self.emit(CellularEvent::CallActive);
            }
            ConsoleCommand::End => {
                if *state == CellularCallState::Idle {
                    return Err("no cellular call".into());
                }
                *state = CellularCallState::Idle;
                drop(state);
                self.emit(CellularEvent::CallEnded);
            }
            _ => {}
        }
        Ok(())
    }

    fn end_call(&self) {
        let mut state = self.state.lock();
        if *state == CellularCallState::Idle {
            return;
        }
        *state = CellularCallState::Idle;
        drop(state);
        self.emit(CellularEvent::CallEnded);
    }
}

#[async_trait]
impl CellularLeg for ConsoleCellular {
    async fn answer(&self) -> cellgate_call_engine::Result<()> {
        let mut state = self.state.lock();
        if *state != CellularCallState::Ringing {
            return Err(cellgate_call_engine::BridgeError::Cellular(format!(
                "cannot answer, cellular leg is {:?}",
                *state
            )));
        }
        *state = CellularCallState::Active;
        drop(state);
        println!("📱 cellular call answered");
        self.emit(CellularEvent::CallActive);
        Ok(())
    }

    async fn reject(&self) -> cellgate_call_engine::Result<()> {
        println!("📱 cellular call rejected");
        self.end_call();
        Ok(())
    }

    async fn dial(&self, number: &str) -> cellgate_call_engine::Result<()> {
        let mut state = self.state.lock();
        if *state != CellularCallState::Idle {
            return Err(cellgate_call_engine::BridgeError::Cellular(format!(
                "cannot dial, cellular leg is {:?}",
                *state
            )));
        }
        *state = CellularCallState::Dialing;
        drop(state);
        println!("📱 dialing {} (type 'active' when it connects)", number);
        self.emit(CellularEvent::CallStateChanged(CellularCallState::Dialing));
        Ok(())
    }

    async fn disconnect(&self) -> cellgate_call_engine::Result<()> {
        if self.state() != CellularCallState::Idle {
            println!("📱 cellular call disconnected");
        }
        self.end_call();
        Ok(())
    }
}

/// Read commands until `quit`, end of input or cancellation
pub async fn run_console<R>(
    input: R,
    leg: Arc<ConsoleCellular>,
    orchestrator: BridgeOrchestrator,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    println!("{}", HELP);
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "console read failed");
                break;
            }
        };
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{} ({})", message, HELP);
                continue;
            }
        };
        match command {
            ConsoleCommand::Dial(number) => {
                if let Err(e) = orchestrator.dial(&number).await {
                    println!("dial failed: {}", e);
                }
            }
            ConsoleCommand::Hangup => orchestrator.hangup().await,
            ConsoleCommand::Status => {
                let state = orchestrator.state().await;
                match orchestrator.current_call().await {
                    Some(call) => println!(
                        "bridge {} | cellular {:?} | {:?} call with {} ({}s)",
                        state,
                        leg.state(),
                        call.origin,
                        call.remote_number,
                        call.age().as_secs()
                    ),
                    None => println!("bridge {} | cellular {:?}", state, leg.state()),
                }
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => break,
            network => {
                if let Err(message) = leg.network(&network) {
                    println!("{}", message);
                }
            }
        }
    }
    info!("console closed");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("ring +15551234567").unwrap(),
            Some(ConsoleCommand::Ring("+15551234567".into()))
        );
        assert_eq!(parse_command("  DIAL 600 ").unwrap(), Some(ConsoleCommand::Dial("600".into())));
        assert_eq!(parse_command("answer").unwrap(), Some(ConsoleCommand::Active));
        assert_eq!(parse_command("exit").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("   ").unwrap(), None);
        assert!(parse_command("ring").is_err());
        assert!(parse_command("fly away").is_err());
    }

    #[tokio::test]
    async fn test_ring_answer_end() {
        let (leg, mut events) = ConsoleCellular::new();
        leg.network(&ConsoleCommand::Ring("555".into())).unwrap();
        assert_eq!(
            events.recv().await,
            Some(CellularEvent::IncomingCall { number: "555".into() })
        );
        assert!(leg.network(&ConsoleCommand::Ring("556".into())).is_err());

        leg.answer().await.unwrap();
        assert_eq!(events.recv().await, Some(CellularEvent::CallActive));
        assert_eq!(leg.state(), CellularCallState::Active);

        leg.network(&ConsoleCommand::End).unwrap();
        assert_eq!(events.recv().await, Some(CellularEvent::CallEnded));
        // already idle: no second end
        leg.disconnect().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dial_then_connect() {
        let (leg, mut events) = ConsoleCellular::new();
        assert!(leg.network(&ConsoleCommand::Active).is_err());
        leg.dial("600").await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(CellularEvent::CallStateChanged(CellularCallState::Dialing))
        );
        assert!(leg.dial("601").await.is_err());
        leg.network(&ConsoleCommand::Active).unwrap();
        assert_eq!(events.recv().await, Some(CellularEvent::CallActive));
        leg.disconnect().await.unwrap();
        assert_eq!(events.recv().await, Some(CellularEvent::CallEnded));
    }
}
