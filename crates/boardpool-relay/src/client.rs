//! The relay board client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OwnedMutexGuard;
use tokio::time::{timeout_at, Instant};

use crate::error::{RelayError, Result};
use crate::wire;

/// Pause applied after talking to a board, and between the power-off and
/// power-on halves of a cycle. The boards need the rest.
const SETTLE: Duration = Duration::from_secs(1);

/// Named async locks, one per relay board host.
#[derive(Default)]
struct HostLocks {
    table: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl HostLocks {
    async fn lock(&self, host: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut table = self.table.lock();
            Arc::clone(table.entry(host.to_owned()).or_default())
        };
        entry.lock_owned().await
    }
}

/// A client for the relay board wire protocol.
///
/// All operations are serialized per host: exactly one conversation with a
/// given board runs at a time, with a settle pause before the host lock is
/// released (the board's TCP stack appears to be single-threaded). Every
/// operation is bounded by its caller's timeout across connect, writes, and
/// reads together.
pub struct RelayClient {
    hosts: HostLocks,
    settle: Duration,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayClient {
    /// Create a client with the standard settle pause.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hosts: HostLocks::default(),
            settle: SETTLE,
        }
    }

    /// Create a client with a custom settle pause. Tests run at reduced
    /// scale; production has no reason to change this.
    #[must_use]
    pub fn with_settle(settle: Duration) -> Self {
        Self {
            hosts: HostLocks::default(),
            settle,
        }
    }

    /// Read the *device* power state behind a relay: true means the device
    /// has power. Completes within `timeout`.
    ///
    /// # Errors
    ///
    /// `Timeout` if the deadline elapses, `BadCoordinate` for out-of-range
    /// bank/relay numbers, `Io`/`ConnectionLost` on socket failures.
    pub async fn get_status(
        &self,
        host: &str,
        bank: u8,
        relay: u8,
        timeout: Duration,
    ) -> Result<bool> {
        wire::check_coordinate(bank, relay)?;
        let deadline = Instant::now() + timeout;
        let _guard = self.hosts.lock(host).await;
        let result = async {
            let mut stream = connect(host, deadline).await?;
            let reply =
                transact(&mut stream, wire::frame(wire::read_status_cmd(relay), bank), deadline)
                    .await?;
            Ok(wire::device_status_from_reply(reply))
        }
        .await;
        self.rest().await;
        result
    }

    /// Set the *device* power state behind a relay and read it back.
    /// Returns whether the board confirmed the requested state.
    ///
    /// # Errors
    ///
    /// `Protocol` if the write is not acknowledged with the OK byte; other
    /// failures as for [`RelayClient::get_status`].
    pub async fn set_status(
        &self,
        host: &str,
        bank: u8,
        relay: u8,
        device_on: bool,
        timeout: Duration,
    ) -> Result<bool> {
        wire::check_coordinate(bank, relay)?;
        let deadline = Instant::now() + timeout;
        let _guard = self.hosts.lock(host).await;
        let result = async {
            let mut stream = connect(host, deadline).await?;
            set_and_confirm(&mut stream, host, bank, relay, device_on, deadline).await
        }
        .await;
        self.rest().await;
        result
    }

    /// Cycle the power of the device behind a relay: cut power and confirm,
    /// pause, restore power and confirm. Returns true only if the board
    /// confirmed both halves.
    ///
    /// The whole sequence (four frames on the same connection) shares one
    /// deadline of `timeout` from now.
    ///
    /// # Errors
    ///
    /// As for [`RelayClient::set_status`].
    pub async fn powercycle(
        &self,
        host: &str,
        bank: u8,
        relay: u8,
        timeout: Duration,
    ) -> Result<bool> {
        wire::check_coordinate(bank, relay)?;
        let deadline = Instant::now() + timeout;
        let _guard = self.hosts.lock(host).await;
        let result = self.powercycle_locked(host, bank, relay, deadline).await;
        self.rest().await;
        result
    }

    async fn powercycle_locked(
        &self,
        host: &str,
        bank: u8,
        relay: u8,
        deadline: Instant,
    ) -> Result<bool> {
        tracing::info!(host, bank, relay, "power-cycle initiated");
        let mut stream = connect(host, deadline).await?;

        if !set_and_confirm(&mut stream, host, bank, relay, false, deadline).await? {
            return Ok(false);
        }
        // Give the device a moment without power before restoring it.
        tokio::time::sleep(self.settle).await;
        if !set_and_confirm(&mut stream, host, bank, relay, true, deadline).await? {
            return Ok(false);
        }

        tracing::info!(host, bank, relay, "power-cycle successful");
        Ok(true)
    }

    async fn rest(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }
}

async fn connect(host: &str, deadline: Instant) -> Result<TcpStream> {
    let (host, port) = split_host_port(host);
    let stream = timeout_at(deadline, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| RelayError::Timeout)??;
    Ok(stream)
}

async fn transact(stream: &mut TcpStream, frame: [u8; 3], deadline: Instant) -> Result<u8> {
    timeout_at(deadline, stream.write_all(&frame))
        .await
        .map_err(|_| RelayError::Timeout)??;
    let mut reply = [0_u8; 1];
    let read = timeout_at(deadline, stream.read(&mut reply))
        .await
        .map_err(|_| RelayError::Timeout)??;
    if read == 0 {
        return Err(RelayError::ConnectionLost);
    }
    Ok(reply[0])
}

async fn set_and_confirm(
    stream: &mut TcpStream,
    host: &str,
    bank: u8,
    relay: u8,
    device_on: bool,
    deadline: Instant,
) -> Result<bool> {
    tracing::info!(host, bank, relay, device_on, "setting relay");
    let reply = transact(stream, wire::frame(wire::set_device_cmd(device_on, relay), bank), deadline)
        .await?;
    if reply != wire::COMMAND_OK {
        tracing::error!(host, reply, "relay command not acknowledged");
        return Err(RelayError::Protocol(reply));
    }

    let reply =
        transact(stream, wire::frame(wire::read_status_cmd(relay), bank), deadline).await?;
    let confirmed = wire::device_status_from_reply(reply) == device_on;
    if !confirmed {
        tracing::warn!(host, bank, relay, "relay did not change state");
    }
    Ok(confirmed)
}

fn split_host_port(host: &str) -> (String, u16) {
    if let Some((name, port)) = host.rsplit_once(':') {
        if let Ok(port) = port.parse() {
            return (name.to_owned(), port);
        }
    }
    (host.to_owned(), wire::DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRelayBoard, RelayAction};

    const FAST: Duration = Duration::from_millis(5);

    async fn board_with_relay() -> FakeRelayBoard {
        let board = FakeRelayBoard::start().await.unwrap();
        board.add_relay(2, 2);
        board
    }

    #[tokio::test]
    async fn get_status_reads_device_power() {
        let board = board_with_relay().await;
        let client = RelayClient::with_settle(FAST);

        // Relay not energized: device has power.
        let status = client
            .get_status(&board.host(), 2, 2, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(status);
        assert_eq!(board.actions(), vec![RelayAction::Get { bank: 2, relay: 2 }]);
    }

    #[tokio::test]
    async fn get_status_times_out() {
        let board = board_with_relay().await;
        board.set_delay(Duration::from_millis(150));
        let client = RelayClient::with_settle(FAST);

        let result = client
            .get_status(&board.host(), 2, 2, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(RelayError::Timeout)));
    }

    #[tokio::test]
    async fn set_status_confirms_device_off() {
        let board = board_with_relay().await;
        let client = RelayClient::with_settle(FAST);

        let confirmed = client
            .set_status(&board.host(), 2, 2, false, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(confirmed);
        assert_eq!(board.relay_energized(2, 2), Some(true));
        assert_eq!(
            board.actions(),
            vec![
                RelayAction::Set {
                    device_on: false,
                    bank: 2,
                    relay: 2
                },
                RelayAction::Get { bank: 2, relay: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn set_status_confirms_device_on() {
        let board = board_with_relay().await;
        let client = RelayClient::with_settle(FAST);

        let confirmed = client
            .set_status(&board.host(), 2, 2, true, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(confirmed);
        assert_eq!(board.relay_energized(2, 2), Some(false));
    }

    #[tokio::test]
    async fn powercycle_issues_four_frames_in_order() {
        let board = board_with_relay().await;
        let client = RelayClient::with_settle(FAST);

        let ok = client
            .powercycle(&board.host(), 2, 2, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(
            board.actions(),
            vec![
                RelayAction::Set {
                    device_on: false,
                    bank: 2,
                    relay: 2
                },
                RelayAction::Get { bank: 2, relay: 2 },
                RelayAction::Set {
                    device_on: true,
                    bank: 2,
                    relay: 2
                },
                RelayAction::Get { bank: 2, relay: 2 },
            ]
        );
        // Power restored at the end.
        assert_eq!(board.relay_energized(2, 2), Some(false));
    }

    #[tokio::test]
    async fn powercycle_times_out_against_slow_board() {
        let board = board_with_relay().await;
        board.set_delay(Duration::from_millis(40));
        let client = RelayClient::with_settle(FAST);

        let result = client
            .powercycle(&board.host(), 2, 2, Duration::from_millis(60))
            .await;
        assert!(matches!(result, Err(RelayError::Timeout)));
    }

    #[tokio::test]
    async fn rejects_out_of_range_coordinates() {
        let client = RelayClient::with_settle(FAST);
        let result = client
            .get_status("127.0.0.1:1", 5, 1, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(RelayError::BadCoordinate { .. })));
    }

    #[tokio::test]
    async fn connection_refused_is_io_error() {
        let client = RelayClient::with_settle(FAST);
        // Port 1 on localhost is almost certainly closed.
        let result = client
            .get_status("127.0.0.1:1", 1, 1, Duration::from_secs(2))
            .await;
        assert!(matches!(
            result,
            Err(RelayError::Io(_) | RelayError::Timeout)
        ));
    }
}
