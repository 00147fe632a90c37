//! A scriptable in-process relay board for tests.
//!
//! Speaks the real wire protocol from the server side against an in-memory
//! relay matrix, records every action, and can delay its replies to provoke
//! client timeouts. Like the real hardware it accepts one connection at a
//! time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::wire;

/// One observed board action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// A status read.
    Get {
        /// Bank addressed.
        bank: u8,
        /// Relay addressed.
        relay: u8,
    },
    /// A relay write, expressed in device-power terms.
    Set {
        /// The device power state the command requests.
        device_on: bool,
        /// Bank addressed.
        bank: u8,
        /// Relay addressed.
        relay: u8,
    },
}

#[derive(Default)]
struct BoardState {
    /// Energized bit per (bank, relay).
    relays: HashMap<(u8, u8), bool>,
    actions: Vec<RelayAction>,
    delay: Duration,
}

/// The fake board. Dropping it shuts the listener down.
pub struct FakeRelayBoard {
    addr: SocketAddr,
    state: Arc<Mutex<BoardState>>,
    task: JoinHandle<()>,
}

impl FakeRelayBoard {
    /// Bind to an ephemeral localhost port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(BoardState::default()));

        let serve_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            // One connection at a time, like the real board.
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                serve_connection(&mut socket, &serve_state).await;
            }
        });

        Ok(Self { addr, state, task })
    }

    /// The `host:port` string clients should dial.
    #[must_use]
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Install a relay at the given coordinate, de-energized (device on).
    pub fn add_relay(&self, bank: u8, relay: u8) {
        self.state.lock().relays.insert((bank, relay), false);
    }

    /// Delay every reply by the given duration.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Everything the board has been asked to do, in order.
    #[must_use]
    pub fn actions(&self) -> Vec<RelayAction> {
        self.state.lock().actions.clone()
    }

    /// The energized bit of a relay, if installed.
    #[must_use]
    pub fn relay_energized(&self, bank: u8, relay: u8) -> Option<bool> {
        self.state.lock().relays.get(&(bank, relay)).copied()
    }
}

impl Drop for FakeRelayBoard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(socket: &mut TcpStream, state: &Arc<Mutex<BoardState>>) {
    let mut frame = [0_u8; 3];
    loop {
        if socket.read_exact(&mut frame).await.is_err() {
            return;
        }
        let delay = state.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let [start, cmd, bank] = frame;
        if start != wire::START_COMMAND {
            tracing::warn!(start, "fake relay board: bad start byte");
            return;
        }

        let reply = match decode(cmd) {
            Some(Decoded::Get { relay }) => {
                let mut board = state.lock();
                let Some(&energized) = board.relays.get(&(bank, relay)) else {
                    tracing::warn!(bank, relay, "fake relay board: unknown relay");
                    return;
                };
                board.actions.push(RelayAction::Get { bank, relay });
                u8::from(energized)
            }
            Some(Decoded::Set { device_on, relay }) => {
                let mut board = state.lock();
                if !board.relays.contains_key(&(bank, relay)) {
                    tracing::warn!(bank, relay, "fake relay board: unknown relay");
                    return;
                }
                board.relays.insert((bank, relay), !device_on);
                board.actions.push(RelayAction::Set {
                    device_on,
                    bank,
                    relay,
                });
                wire::COMMAND_OK
            }
            None => {
                tracing::warn!(cmd, "fake relay board: unknown command");
                return;
            }
        };

        if socket.write_all(&[reply]).await.is_err() {
            return;
        }
    }
}

enum Decoded {
    Get { relay: u8 },
    Set { device_on: bool, relay: u8 },
}

fn decode(cmd: u8) -> Option<Decoded> {
    match cmd {
        116..=123 => Some(Decoded::Get { relay: cmd - 115 }),
        // Energize: device power off.
        108..=115 => Some(Decoded::Set {
            device_on: false,
            relay: cmd - 107,
        }),
        // Release: device power on.
        100..=107 => Some(Decoded::Set {
            device_on: true,
            relay: cmd - 99,
        }),
        _ => None,
    }
}
