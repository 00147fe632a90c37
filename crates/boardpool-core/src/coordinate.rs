//! Relay coordinates.
//!
//! A relay board exposes up to 4 banks of 8 relays each. A device's power
//! feed is identified by the board's hostname plus a bank and relay number,
//! persisted as a string of the form `host:bankN:relayM`.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The address of one controllable power relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayCoordinate {
    /// Relay board hostname, optionally with a `:port` suffix.
    pub host: String,
    /// Bank number, 1 through 4.
    pub bank: u8,
    /// Relay number within the bank, 1 through 8.
    pub relay: u8,
}

impl RelayCoordinate {
    /// Create a coordinate, validating the bank and relay ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidCoordinate` if the bank is not in 1..=4 or
    /// the relay is not in 1..=8.
    pub fn new(host: impl Into<String>, bank: u8, relay: u8) -> Result<Self, CoreError> {
        let host = host.into();
        if !(1..=4).contains(&bank) {
            return Err(CoreError::InvalidCoordinate {
                value: format!("{host}:bank{bank}:relay{relay}"),
                reason: "bank must be between 1 and 4",
            });
        }
        if !(1..=8).contains(&relay) {
            return Err(CoreError::InvalidCoordinate {
                value: format!("{host}:bank{bank}:relay{relay}"),
                reason: "relay must be between 1 and 8",
            });
        }
        Ok(Self { host, bank, relay })
    }
}

impl fmt::Display for RelayCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:bank{}:relay{}", self.host, self.bank, self.relay)
    }
}

impl FromStr for RelayCoordinate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| CoreError::InvalidCoordinate {
            value: s.to_owned(),
            reason,
        };

        // Split from the right: the host part may itself contain a port.
        let mut parts = s.rsplitn(3, ':');
        let relay_part = parts.next().ok_or_else(|| invalid("missing relay part"))?;
        let bank_part = parts.next().ok_or_else(|| invalid("missing bank part"))?;
        let host = parts.next().ok_or_else(|| invalid("missing hostname"))?;

        let bank = bank_part
            .strip_prefix("bank")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| invalid("bank part must look like bankN"))?;
        let relay = relay_part
            .strip_prefix("relay")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| invalid("relay part must look like relayM"))?;

        Self::new(host, bank, relay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let coord: RelayCoordinate = "relay-047.example.com:bank2:relay5".parse().unwrap();
        assert_eq!(coord.host, "relay-047.example.com");
        assert_eq!(coord.bank, 2);
        assert_eq!(coord.relay, 5);
        assert_eq!(coord.to_string(), "relay-047.example.com:bank2:relay5");
    }

    #[test]
    fn parse_host_with_port() {
        let coord: RelayCoordinate = "127.0.0.1:2101:bank1:relay8".parse().unwrap();
        assert_eq!(coord.host, "127.0.0.1:2101");
        assert_eq!(coord.bank, 1);
        assert_eq!(coord.relay, 8);
    }

    #[test]
    fn reject_bad_shapes() {
        assert!("relayhost".parse::<RelayCoordinate>().is_err());
        assert!("host:bank1".parse::<RelayCoordinate>().is_err());
        assert!("host:b1:relay2".parse::<RelayCoordinate>().is_err());
        assert!("host:bank1:r2".parse::<RelayCoordinate>().is_err());
    }

    #[test]
    fn reject_out_of_range() {
        assert!("host:bank0:relay1".parse::<RelayCoordinate>().is_err());
        assert!("host:bank5:relay1".parse::<RelayCoordinate>().is_err());
        assert!("host:bank1:relay0".parse::<RelayCoordinate>().is_err());
        assert!("host:bank1:relay9".parse::<RelayCoordinate>().is_err());
    }
}
