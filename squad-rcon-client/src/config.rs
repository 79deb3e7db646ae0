use std::time::Duration;

use crate::ids::WRAP_IDS_AFTER;
use crate::packet::MAX_BODY_SIZE;
use crate::RconError;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// First packet ID used by default. SquadJS and similar tools use IDs 1 and 2.
pub const DEFAULT_START_ID: i32 = 10000;

pub const DEFAULT_CONFIRMATION_COMMAND: &str = "ShowCurrentMap";

/// Connection settings for [`connect`](crate::connect).
#[derive(Debug, Clone)]
pub struct Config {
    /// Time to wait for the TCP connection to open. Zero waits forever.
    pub dial_timeout: Duration,

    /// Time to wait for a command to be written to the socket. Zero waits forever.
    pub write_timeout: Duration,

    /// The first packet ID that will be used. Change it when several clients connect to the same
    /// server, so their IDs are easy to tell apart. Must be at least 3.
    pub start_id: i32,

    /// The command sent after every executed command. Its response tells the client that the
    /// response to the executed command is complete, so it should be as small as possible.
    pub confirmation_command: String,

    /// Time to wait for a complete response before giving up on a command. `None` waits
    /// forever.
    pub response_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            start_id: DEFAULT_START_ID,
            confirmation_command: DEFAULT_CONFIRMATION_COMMAND.to_string(),
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
        }
    }
}

impl Config {
    pub fn validate(&self) -> crate::Result<()> {
        if self.start_id < 3 {
            return Err(RconError::InvalidConfig(format!(
                "start ID {} collides with the reserved IDs 1 and 2",
                self.start_id
            ))
            .into());
        }

        // The cursor can move up to three past the window before it wraps
        if self.start_id > i32::MAX - (WRAP_IDS_AFTER + 3) {
            return Err(RconError::InvalidConfig(format!(
                "start ID {} leaves no room for {} IDs",
                self.start_id, WRAP_IDS_AFTER
            ))
            .into());
        }

        if self.confirmation_command.is_empty() {
            return Err(
                RconError::InvalidConfig("confirmation command is empty".to_string()).into(),
            );
        }

        if self.confirmation_command.len() > MAX_BODY_SIZE {
            return Err(RconError::InvalidConfig(format!(
                "confirmation command is longer than {} bytes",
                MAX_BODY_SIZE
            ))
            .into());
        }

        if self.response_timeout == Some(Duration::ZERO) {
            return Err(
                RconError::InvalidConfig("response timeout must not be zero".to_string()).into(),
            );
        }

        Ok(())
    }
}
