//! Wire format constants and frame construction.
//!
//! A command frame is three bytes: the start byte, a command byte selecting
//! the action and relay-within-bank, and the bank number. The command byte
//! offsets come from the board manual. Replies are a single byte: `0x55`
//! acknowledges a write; status reads return the relay's energized bit.

use crate::error::RelayError;

/// TCP port relay boards listen on by default.
pub const DEFAULT_PORT: u16 = 2101;

/// First byte of every command frame (enter command mode).
pub const START_COMMAND: u8 = 0xFE;

/// Reply byte acknowledging a successful write.
pub const COMMAND_OK: u8 = 0x55;

/// Command byte for reading the status of relay `relay` in a bank.
#[must_use]
pub const fn read_status_cmd(relay: u8) -> u8 {
    115 + relay
}

/// Command byte for energizing relay `relay` in a bank (device power off).
#[must_use]
pub const fn turn_on_cmd(relay: u8) -> u8 {
    107 + relay
}

/// Command byte for releasing relay `relay` in a bank (device power on).
#[must_use]
pub const fn turn_off_cmd(relay: u8) -> u8 {
    99 + relay
}

/// Command byte that puts the *device* in the given power state. The device
/// hangs off the relay's Normally Closed side, so device-on means relay-off.
#[must_use]
pub const fn set_device_cmd(device_on: bool, relay: u8) -> u8 {
    if device_on {
        turn_off_cmd(relay)
    } else {
        turn_on_cmd(relay)
    }
}

/// Interpret a status-read reply as device power: an energized relay (1)
/// means the device is off.
#[must_use]
pub const fn device_status_from_reply(reply: u8) -> bool {
    reply != 1
}

/// Build a complete command frame.
#[must_use]
pub const fn frame(cmd: u8, bank: u8) -> [u8; 3] {
    [START_COMMAND, cmd, bank]
}

/// Validate a bank/relay pair against the board's addressable range.
///
/// # Errors
///
/// Returns `RelayError::BadCoordinate` when out of range.
pub const fn check_coordinate(bank: u8, relay: u8) -> Result<(), RelayError> {
    if bank >= 1 && bank <= 4 && relay >= 1 && relay <= 8 {
        Ok(())
    } else {
        Err(RelayError::BadCoordinate { bank, relay })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_byte_offsets() {
        assert_eq!(read_status_cmd(1), 116);
        assert_eq!(read_status_cmd(8), 123);
        assert_eq!(turn_on_cmd(1), 108);
        assert_eq!(turn_on_cmd(8), 115);
        assert_eq!(turn_off_cmd(1), 100);
        assert_eq!(turn_off_cmd(8), 107);
    }

    #[test]
    fn device_commands_invert_relay_sense() {
        // Powering the device off energizes the relay.
        assert_eq!(set_device_cmd(false, 3), turn_on_cmd(3));
        assert_eq!(set_device_cmd(true, 3), turn_off_cmd(3));
    }

    #[test]
    fn status_reply_inverts_relay_sense() {
        assert!(device_status_from_reply(0));
        assert!(!device_status_from_reply(1));
    }

    #[test]
    fn frame_layout() {
        assert_eq!(frame(read_status_cmd(3), 1), [0xFE, 118, 1]);
    }

    #[test]
    fn coordinate_ranges() {
        assert!(check_coordinate(1, 1).is_ok());
        assert!(check_coordinate(4, 8).is_ok());
        assert!(check_coordinate(0, 1).is_err());
        assert!(check_coordinate(5, 1).is_err());
        assert!(check_coordinate(1, 0).is_err());
        assert!(check_coordinate(1, 9).is_err());
    }
}
