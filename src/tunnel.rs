//! TCP tunneling through pooled connections.
//!
//! A [`Tunnel`] listens on a local address and forwards every accepted
//! connection to a remote endpoint through a pooled connection to an
//! intermediate host. Each forwarded connection reserves one session slot,
//! so tunnels share the same per-connection admission as sessions; the
//! pooled connection itself stays owned by the pool and is never closed
//! when a single forwarded connection ends.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::session::SlotReservation;
use crate::transport::{Connection, Connector};

/// A running tunnel. Closing it (or dropping it) stops the listener;
/// already-forwarded connections run to completion.
pub struct Tunnel {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl<C: Connector> Pool<C> {
    /// Open a tunnel to `remote_addr` via a pooled connection to `host`. A
    /// local TCP socket listens on `local_addr` (use port 0 for an
    /// ephemeral port and read it back from
    /// [`Tunnel::local_addr`]).
    pub async fn tunnel(&self, host: &str, local_addr: &str, remote_addr: &str) -> Result<Tunnel> {
        let remote = split_host_port(remote_addr)?;
        let listener = TcpListener::bind(local_addr).await.map_err(Error::Io)?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;

        let shutdown = CancellationToken::new();
        tokio::spawn(accept_loop(
            self.clone(),
            listener,
            host.to_string(),
            remote,
            shutdown.clone(),
        ));

        Ok(Tunnel {
            local_addr,
            shutdown,
        })
    }
}

impl Tunnel {
    /// The address the local listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop<C: Connector>(
    pool: Pool<C>,
    listener: TcpListener,
    host: String,
    remote: (String, u16),
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            // Closed tunnel: stop quietly.
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((local, peer)) => {
                    trace!(%peer, "tunnel accepted connection");
                    tokio::spawn(forward(pool.clone(), host.clone(), remote.clone(), local));
                }
                Err(err) => {
                    warn!(%err, "tunnel listener accept");
                    return;
                }
            }
        }
    }
}

/// Forward one accepted connection: reserve a slot on a pooled connection,
/// open a direct-tcpip channel, and pump bytes both ways until either side
/// closes. The connection goes back to the pool untouched.
async fn forward<C: Connector>(
    pool: Pool<C>,
    host: String,
    remote: (String, u16),
    mut local: TcpStream,
) {
    let (pooled, _session_id) = match pool.acquire_connection(&host).await {
        Ok(acquired) => acquired,
        Err(err) => {
            warn!(host, %err, "tunnel connection acquire");
            return;
        }
    };
    let slot = SlotReservation::new(
        Arc::clone(&pooled.slots),
        pool.config().session_close_delay,
    );

    let mut stream = match pooled.conn.open_direct_tcpip(&remote.0, remote.1).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(host, %err, "tunnel channel open");
            slot.release_now();
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut local, &mut stream).await {
        Ok((to_remote, to_local)) => {
            trace!(host, to_remote, to_local, "tunnel connection finished");
        }
        Err(err) => debug!(host, %err, "tunnel copy"),
    }
    // `slot` drops here and the reservation returns after the close delay.
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let colon = addr
        .rfind(':')
        .ok_or_else(|| Error::InvalidTarget(addr.to_string()))?;
    let port = addr[colon + 1..]
        .parse::<u16>()
        .map_err(|_| Error::InvalidTarget(addr.to_string()))?;
    let host = &addr[..colon];
    if host.is_empty() {
        return Err(Error::InvalidTarget(addr.to_string()));
    }
    Ok((host.to_string(), port))
}
