// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The russh-backed transport.
//!
//! [`SshConnector`] dials and authenticates; [`SshConnection`] wraps the
//! resulting handle and opens session, SFTP, and direct-tcpip channels for
//! the pool.

mod auth;
mod exec;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle, Handler, Msg};
use russh::{ChannelOpenFailure, ChannelStream, Disconnect};
use tokio::net::lookup_host;

use crate::error::{Error, Result};
use crate::target::Target;
use crate::transport::{Connection, Connector};

pub use auth::{AuthMethod, ServerCheckMethod};
pub use exec::{ExecResult, RemoteSession};

/// Dials authenticated SSH connections for the pool.
///
/// Holds the default user, the authentication material, and the host key
/// policy shared by every dial. A `user@` prefix on a pool target overrides
/// the default user for that dial only; the connector is never mutated.
pub struct SshConnector {
    user: String,
    auth: AuthMethod,
    server_check: ServerCheckMethod,
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new(user: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            user: user.into(),
            auth,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
            config: Arc::new(client::Config::default()),
        }
    }

    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    /// Use a non-default [`russh::client::Config`] (timeouts, preferred
    /// algorithms, keepalive).
    pub fn with_config(mut self, config: client::Config) -> Self {
        self.config = Arc::new(config);
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Connection = SshConnection;

    async fn connect(&self, target: &Target) -> Result<SshConnection> {
        let user = target.user.as_deref().unwrap_or(&self.user);

        // Try each resolved address until one accepts the TCP+SSH
        // handshake. Authentication runs once, on the first connection that
        // succeeds.
        let addrs = lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(Error::AddressInvalid)?;
        let mut connected = Err(Error::AddressInvalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve to any addresses",
        )));
        for addr in addrs {
            let handler = ClientHandler {
                hostname: target.host.clone(),
                address: addr,
                server_check: self.server_check.clone(),
            };
            match client::connect(Arc::clone(&self.config), addr, handler).await {
                Ok(handle) => {
                    connected = Ok(handle);
                    break;
                }
                Err(err) => connected = Err(err),
            }
        }
        let mut handle = connected?;

        auth::authenticate(&mut handle, user, self.auth.clone()).await?;

        Ok(SshConnection { handle })
    }
}

/// One authenticated SSH connection, multiplexing channels for the pool.
pub struct SshConnection {
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl Connection for SshConnection {
    type Session = RemoteSession;
    type Sftp = russh_sftp::client::SftpSession;
    type Stream = ChannelStream<Msg>;

    async fn open_session(&self) -> Result<RemoteSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(map_channel_open_err)?;
        Ok(RemoteSession::new(channel))
    }

    async fn open_sftp(&self) -> Result<russh_sftp::client::SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(map_channel_open_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(Error::Ssh)?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<Self::Stream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(map_channel_open_err)?;
        Ok(channel.into_stream())
    }

    async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await
            .map_err(Error::Ssh)
    }
}

/// The server's session quota shows up as an administratively prohibited
/// channel open; the pool retries that one with a backoff.
fn map_channel_open_err(err: russh::Error) -> Error {
    match err {
        russh::Error::ChannelOpenFailure(ChannelOpenFailure::AdministrativelyProhibited) => {
            Error::SessionLimit
        }
        other => Error::Ssh(other),
    }
}

/// Client-side handler: verifies the server host key against the configured
/// policy.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    address: SocketAddr,
    server_check: ServerCheckMethod,
}

impl Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool> {
        match &self.server_check {
            ServerCheckMethod::NoCheck => Ok(true),
            ServerCheckMethod::PublicKey(key) => {
                let pk = russh::keys::parse_public_key_base64(key)
                    .map_err(|_| Error::ServerCheckFailed)?;
                Ok(pk == *server_public_key)
            }
            ServerCheckMethod::PublicKeyFile(key_file_name) => {
                let pk = russh::keys::load_public_key(key_file_name)
                    .map_err(|_| Error::ServerCheckFailed)?;
                Ok(pk == *server_public_key)
            }
            ServerCheckMethod::KnownHostsFile(known_hosts_path) => {
                russh::keys::check_known_hosts_path(
                    &self.hostname,
                    self.address.port(),
                    server_public_key,
                    known_hosts_path,
                )
                .map_err(|_| Error::ServerCheckFailed)
            }
            ServerCheckMethod::DefaultKnownHostsFile => russh::keys::check_known_hosts(
                &self.hostname,
                self.address.port(),
                server_public_key,
            )
            .map_err(|_| Error::ServerCheckFailed),
        }
    }
}
