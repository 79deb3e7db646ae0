//! This crate provides an asynchronous RCON client for [Squad] dedicated servers.
//!
//! Squad speaks a dialect of the [Source RCON protocol] with two quirks that this client is built
//! around:
//!  - A failed authentication is answered by closing the TCP connection, not with a failure packet.
//!  - Command responses can be split over several packets, and nothing marks the last one.
//!
//! To find the end of a response, every command is followed by a cheap _confirmation command_
//! sent with the next (odd) packet ID. The server answers requests in order, so once the
//! confirmation's response arrives every packet of the real response has been received.
//!
//! The client requires a [Tokio](https://tokio.rs/) runtime. It can be shared between tasks, and
//! any number of commands can be in flight at the same time.
//!
//! # Example
//! ```rust,no_run
//! use squad_rcon_client::{connect, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = connect("localhost:21114", "password123", Config::default())
//!         .await
//!         .unwrap();
//!
//!     let response = client.execute("ListCommands 1").await.unwrap();
//!     println!("{}", response);
//!
//!     client.close().await.unwrap();
//! }
//! ```
//!
//! [Squad]: https://joinsquad.com/
//! [Source RCON protocol]: https://developer.valvesoftware.com/wiki/Source_RCON_Protocol

mod auth;
mod callbacks;
mod client;
mod config;
mod engine;
mod ids;
pub mod packet;
pub mod players;
mod writer;

use std::time::Duration;

/// Error type for RCON operations.
///
/// Use [`Error::kind`] to branch on the cause of an error.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(RconError);

#[derive(Debug, thiserror::Error)]
pub(crate) enum RconError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("command is {len} bytes long, the limit is {max}")]
    CommandTooLong { len: usize, max: usize },

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("RCON password is incorrect")]
    IncorrectPassword,

    #[error("failed to connect to rcon server: {0}")]
    Connect(#[source] std::io::Error),

    #[error("timed out connecting to rcon server after {0:?}")]
    ConnectTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error(transparent)]
    Packet(#[from] packet::PacketError),

    #[error("unexpected ID in auth response, got {got}, expected {expected}")]
    ProtocolMismatch { expected: i32, got: i32 },

    #[error("no response to request {id} within {timeout:?}")]
    ResponseTimeout { id: i32, timeout: Duration },

    #[error("request ID {id} is still in use, too many requests in flight")]
    TooManyRequests { id: i32 },

    #[error("connection lost: {reason}")]
    ConnectionLost { kind: ErrorKind, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An empty command was passed to [`Client::execute`]. Nothing was sent.
    EmptyCommand,

    /// The command does not fit into a single packet. Nothing was sent.
    CommandTooLong,

    /// A command was dispatched before authentication completed.
    NotAuthenticated,

    /// The server closed the connection in response to the password.
    IncorrectPassword,

    /// The TCP connection could not be opened.
    Connect,

    /// The connection was closed, either by the server or by [`Client::close`].
    TransportClosed,

    /// Any other transport failure, including a connection lost in the middle of a packet.
    TransportError,

    /// The server sent bytes that don't form a valid packet.
    MalformedPacket,

    /// The server answered authentication with an unexpected packet ID.
    ProtocolMismatch,

    /// No response arrived before the configured response timeout.
    ResponseTimeout,

    /// Every request ID in the allocation window is held by a pending request.
    TooManyRequests,

    /// The [`Config`] was rejected.
    InvalidConfig,
}

/// [`Result`] alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use self::client::*;
pub use self::config::*;
pub use self::ids::MAX_IN_FLIGHT;

impl<T> From<T> for Error
where
    T: Into<RconError>,
{
    fn from(inner: T) -> Self {
        Error(inner.into())
    }
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            RconError::EmptyCommand => ErrorKind::EmptyCommand,
            RconError::CommandTooLong { .. } => ErrorKind::CommandTooLong,
            RconError::NotAuthenticated => ErrorKind::NotAuthenticated,
            RconError::IncorrectPassword => ErrorKind::IncorrectPassword,
            RconError::Connect(_) | RconError::ConnectTimeout(_) => ErrorKind::Connect,
            RconError::Io(err) => io_error_kind(err),
            RconError::WriteTimeout(_) => ErrorKind::TransportError,
            RconError::Packet(err) => err.kind(),
            RconError::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
            RconError::ResponseTimeout { .. } => ErrorKind::ResponseTimeout,
            RconError::TooManyRequests { .. } => ErrorKind::TooManyRequests,
            RconError::ConnectionLost { kind, .. } => *kind,
            RconError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Whether the connection can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransportClosed
                | ErrorKind::TransportError
                | ErrorKind::MalformedPacket
                | ErrorKind::ProtocolMismatch
                | ErrorKind::IncorrectPassword
        )
    }

    /// The decode error, if this error was caused by a packet that could not be read.
    pub fn packet_error(&self) -> Option<&packet::PacketError> {
        match &self.0 {
            RconError::Packet(err) => Some(err),
            _ => None,
        }
    }
}

pub(crate) fn io_error_kind(err: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;

    match err.kind() {
        Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::BrokenPipe
        | Io::NotConnected
        | Io::UnexpectedEof => ErrorKind::TransportClosed,
        _ => ErrorKind::TransportError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_io_error() {
        let reset: Error = std::io::Error::from(std::io::ErrorKind::ConnectionReset).into();
        assert_eq!(reset.kind(), ErrorKind::TransportClosed);
        assert!(reset.is_fatal());

        let other: Error = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(other.kind(), ErrorKind::TransportError);
    }

    #[test]
    fn local_errors_are_not_fatal() {
        let err: Error = RconError::EmptyCommand.into();
        assert_eq!(err.kind(), ErrorKind::EmptyCommand);
        assert!(!err.is_fatal());
        assert!(err.packet_error().is_none());
        assert_eq!(err.to_string(), "command is empty");
    }

    #[test]
    fn connection_lost_keeps_its_kind() {
        let err: Error = RconError::ConnectionLost {
            kind: ErrorKind::MalformedPacket,
            reason: "bad terminator".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::MalformedPacket);
        assert_eq!(err.to_string(), "connection lost: bad terminator");
    }
}
