//! Pooled SSH sessions, SFTP channels, and TCP tunnels.
//!
//! A [`Pool`] multiplexes many concurrent remote operations over a bounded
//! fleet of persistent SSH connections per host. Connections are dialed
//! lazily, at most one handshake per host at a time, and each connection
//! admits at most `MaxSessions` concurrent channels, matching the cap
//! enforced by typical SSH servers.
//!
//! The pool is generic over a [`Connector`] so tests can substitute an
//! in-memory transport; [`SshConnector`] is the russh-backed implementation
//! used in production.

pub mod config;
pub mod error;
mod exec;
pub mod pool;
pub mod session;
pub mod ssh;
pub mod target;
pub mod transport;
pub mod tunnel;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use pool::Pool;
pub use session::{Session, SftpSession};
pub use ssh::{AuthMethod, ExecResult, RemoteSession, ServerCheckMethod, SshConnector};
pub use target::Target;
pub use transport::{Connection, Connector};
pub use tunnel::Tunnel;

/// A pool backed by the bundled russh connector.
pub type SshPool = Pool<SshConnector>;
