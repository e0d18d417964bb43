//! The seam between the pool and the SSH implementation.
//!
//! The pool cares about exactly three capabilities of a transport: opening
//! session channels, opening SFTP channels, and opening direct-tcpip
//! streams. Everything else about SSH (handshake, key exchange, keepalives)
//! stays behind [`Connector::connect`]. Tests swap in an in-memory
//! implementation; production uses [`crate::ssh::SshConnector`].

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::target::Target;

/// Dials new connections. One connector backs one pool and holds the
/// credentials shared by every dial.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Establish and authenticate a connection to `target`. When
    /// `target.user` is set it overrides the connector's configured user for
    /// this dial only; the connector's own configuration is never mutated.
    async fn connect(&self, target: &Target) -> Result<Self::Connection>;
}

/// An established connection capable of multiplexing channels.
///
/// Connections are owned exclusively by the pool registry and closed only at
/// pool shutdown; handles returned to callers borrow capacity, never the
/// connection itself.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Session: Send + 'static;
    type Sftp: Send + 'static;
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open one session channel (a remote command or shell execution).
    async fn open_session(&self) -> Result<Self::Session>;

    /// Open one SFTP channel.
    async fn open_sftp(&self) -> Result<Self::Sftp>;

    /// Open a direct-tcpip channel to `host:port` on the remote side.
    async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<Self::Stream>;

    /// Tear the connection down. Called once, at pool shutdown.
    async fn close(&self) -> Result<()>;
}
