use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("min_bettors must be at least 2 (got {value})")]
    InvalidMinBettors { value: usize },
}

/// Tunables for the room coordinator and its sockets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomConfig {
    /// Countdown start value; one unit elapses per tick.
    pub countdown_secs: u32,
    pub tick_ms: u64,
    pub probe_interval_ms: u64,
    /// Distinct bettors required for a round to settle.
    pub min_bettors: usize,
    /// Balance granted to a user on first bootstrap.
    pub initial_balance: u64,
    pub mailbox_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_capacity: usize,
    pub ws_send_timeout_ms: u64,
    pub ws_max_message_bytes: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 30,
            tick_ms: 1_000,
            probe_interval_ms: 30_000,
            min_bettors: 2,
            initial_balance: 10,
            mailbox_size: 1_024,
            outbound_capacity: 256,
            ws_send_timeout_ms: 2_000,
            ws_max_message_bytes: 64 * 1024,
        }
    }
}

impl RoomConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            countdown_secs: read_u32("ROOM_COUNTDOWN_SECS", defaults.countdown_secs),
            tick_ms: read_ms("ROOM_TICK_MS", defaults.tick_ms),
            probe_interval_ms: read_ms("ROOM_PROBE_INTERVAL_MS", defaults.probe_interval_ms),
            min_bettors: read_usize("ROOM_MIN_BETTORS", defaults.min_bettors),
            initial_balance: read_u64("ROOM_INITIAL_BALANCE", defaults.initial_balance),
            mailbox_size: read_usize("ROOM_MAILBOX_SIZE", defaults.mailbox_size),
            outbound_capacity: read_usize("ROOM_OUTBOUND_CAPACITY", defaults.outbound_capacity),
            ws_send_timeout_ms: read_ms("ROOM_WS_SEND_TIMEOUT_MS", defaults.ws_send_timeout_ms),
            ws_max_message_bytes: read_usize(
                "ROOM_WS_MAX_MESSAGE_BYTES",
                defaults.ws_max_message_bytes,
            ),
        }
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        ensure_nonzero("countdown_secs", u64::from(self.countdown_secs))?;
        ensure_nonzero("tick_ms", self.tick_ms)?;
        ensure_nonzero("probe_interval_ms", self.probe_interval_ms)?;
        ensure_nonzero("mailbox_size", self.mailbox_size as u64)?;
        ensure_nonzero("outbound_capacity", self.outbound_capacity as u64)?;
        ensure_nonzero("ws_send_timeout_ms", self.ws_send_timeout_ms)?;
        ensure_nonzero("ws_max_message_bytes", self.ws_max_message_bytes as u64)?;
        if self.min_bettors < 2 {
            return Err(ConfigError::InvalidMinBettors {
                value: self.min_bettors,
            });
        }
        Ok(self)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn ws_send_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_send_timeout_ms)
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn read_ms(key: &str, fallback: u64) -> u64 {
    read_u64(key, fallback)
}

fn read_u64(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(fallback)
}

fn read_u32(key: &str, fallback: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .unwrap_or(fallback)
}

fn read_usize(key: &str, fallback: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RoomConfig::default().validate().unwrap();
        assert_eq!(config.countdown_secs, 30);
        assert_eq!(config.min_bettors, 2);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.probe_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_validation() {
        let valid = RoomConfig::default();

        let zero_countdown = RoomConfig {
            countdown_secs: 0,
            ..valid.clone()
        };
        assert_eq!(
            zero_countdown.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "countdown_secs",
                value: 0
            })
        );

        let zero_tick = RoomConfig {
            tick_ms: 0,
            ..valid.clone()
        };
        assert!(zero_tick.validate().is_err());

        let zero_outbound = RoomConfig {
            outbound_capacity: 0,
            ..valid.clone()
        };
        assert!(zero_outbound.validate().is_err());

        let lone_bettor = RoomConfig {
            min_bettors: 1,
            ..valid
        };
        assert_eq!(
            lone_bettor.validate(),
            Err(ConfigError::InvalidMinBettors { value: 1 })
        );
    }
}
