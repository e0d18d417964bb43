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

//! The connection pool core: dial coordination, the per-host connection
//! registry, and session admission.
//!
//! Take care here, there are tricky nested locks. The discipline is:
//! `dialing` and `clients` are plain mutexes held only for short sections
//! that never touch the network, and slot semaphores are only ever waited on
//! outside both. The snapshot-and-release pattern in
//! [`Pool::acquire_connection`] is what keeps the blocking wait out of the
//! locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::session::{Session, SftpSession, SlotReservation};
use crate::target::Target;
use crate::transport::{Connection, Connector};

/// Bounded backstop for the server-enforced session limit: the slot
/// semaphore plus the close delay prevent the race in practice, but a server
/// that is slow to reclaim sessions can still refuse an open.
const SESSION_OPEN_RETRIES: usize = 500;
const SESSION_OPEN_BACKOFF: Duration = Duration::from_millis(10);

/// An established connection in the registry: the connector's connection,
/// its slot semaphore, and a pool-unique ID.
pub(crate) struct PooledConnection<T> {
    pub(crate) conn: T,
    pub(crate) slots: Arc<Semaphore>,
    pub(crate) id: u64,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    /// host string -> established connections, in dial order.
    clients: Mutex<HashMap<String, Vec<Arc<PooledConnection<C::Connection>>>>>,
    /// host string -> gate for the one in-flight dial to that host. The
    /// token is cancelled when the dial finishes, waking every waiter;
    /// waiters re-enter acquisition and consult the registry rather than
    /// inheriting the outcome.
    dialing: Mutex<HashMap<String, CancellationToken>>,
    next_connection_id: AtomicU64,
    next_session_id: AtomicU64,
}

impl<C: Connector> PoolInner<C> {
    fn lock_clients(
        &self,
    ) -> MutexGuard<'_, HashMap<String, Vec<Arc<PooledConnection<C::Connection>>>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dialing(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.dialing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A pool of SSH connections, keyed by host string.
///
/// Cloning is cheap and shares the underlying pool. Acquire sessions with
/// [`get`](Pool::get) / [`get_sftp`](Pool::get_sftp); handles release their
/// slot on drop. When a host's connections are saturated and the per-host
/// connection cap is reached, acquisition blocks until another caller
/// releases a session somewhere.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Pool<C> {
    /// Create a pool that dials through `connector`. Zero-valued limits in
    /// `config` fall back to their defaults.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config: config.normalized(),
                clients: Mutex::new(HashMap::new()),
                dialing: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(0),
                next_session_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquire a session to `host` (`[user@]hostname_or_ip[:port]`).
    ///
    /// If every connection to the host already carries `max_sessions`
    /// sessions and `max_connections` is met, this blocks until a session is
    /// released somewhere. The returned handle must be dropped (or
    /// [`released`](Session::release)) to hand the slot back.
    pub async fn get(&self, host: &str) -> Result<Session<C>> {
        let (pooled, session_id) = self.acquire_connection(host).await?;

        trace!(host, session = session_id, connection = pooled.id, "new session");

        let raw = match self.open_on(&pooled).await {
            Ok(raw) => raw,
            Err(err) => {
                pooled.slots.add_permits(1);
                return Err(err);
            }
        };
        let slot = SlotReservation::new(
            Arc::clone(&pooled.slots),
            self.inner.config.session_close_delay,
        );
        Ok(Session::new(raw, slot, host, session_id, pooled.id))
    }

    /// Acquire an SFTP session to `host`. Identical admission and release
    /// semantics to [`get`](Pool::get).
    pub async fn get_sftp(&self, host: &str) -> Result<SftpSession<C>> {
        let (pooled, session_id) = self.acquire_connection(host).await?;

        trace!(host, session = session_id, connection = pooled.id, "new sftp session");

        let raw = match self.open_sftp_on(&pooled).await {
            Ok(raw) => raw,
            Err(err) => {
                pooled.slots.add_permits(1);
                return Err(err);
            }
        };
        let slot = SlotReservation::new(
            Arc::clone(&pooled.slots),
            self.inner.config.session_close_delay,
        );
        Ok(SftpSession::new(raw, slot, host, session_id, pooled.id))
    }

    /// Close every pooled connection and empty the registry.
    ///
    /// Outstanding session handles stay valid to drop; they only touch their
    /// own slot semaphore. A later acquisition dials afresh.
    pub async fn close(&self) {
        let drained: Vec<(String, Vec<Arc<PooledConnection<C::Connection>>>)> =
            self.inner.lock_clients().drain().collect();

        for (host, connections) in drained {
            if self.inner.config.debug {
                debug!(host, connections = connections.len(), "sshpool close");
            }
            for pooled in connections {
                if let Err(err) = pooled.conn.close().await {
                    trace!(host, connection = pooled.id, %err, "connection close");
                }
            }
        }
    }

    /// Reserve one session slot on a connection to `host`, dialing a new
    /// connection if the fleet has room, or blocking on the saturated fleet
    /// otherwise. On success exactly one slot has been taken; the caller
    /// owes it back via [`SlotReservation`] or `add_permits`.
    pub(crate) async fn acquire_connection(
        &self,
        host: &str,
    ) -> Result<(Arc<PooledConnection<C::Connection>>, u64)> {
        let inner = &self.inner;
        // One ID per public acquisition, no matter how many times the
        // dial race makes us restart below.
        let session_id = inner.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        let target = Target::parse(host)?;

        loop {
            // If another acquisition is mid-dial to this host, wait for it
            // to finish, then look at whatever connections now exist.
            let gate = inner.lock_dialing().get(host).cloned();
            if let Some(gate) = gate {
                gate.cancelled().await;
            }

            // Prefer a connection with a free slot, scanning in dial order,
            // and reserve it while still under the lock. If the fleet is at
            // the connection cap, snapshot it so we can block outside the
            // lock.
            let mut saturated = None;
            {
                let clients = inner.lock_clients();
                if let Some(list) = clients.get(host) {
                    if let Some(pooled) = list.iter().find(|pooled| try_reserve(&pooled.slots)) {
                        return Ok((Arc::clone(pooled), session_id));
                    }
                    if list.len() >= inner.config.max_connections {
                        saturated = Some(list.clone());
                    }
                }
            }

            if let Some(candidates) = saturated {
                let pooled = acquire_any_slot(candidates).await?;
                return Ok((pooled, session_id));
            }

            // Room to grow: race to become this host's dialer. Losing the
            // race restarts the whole acquisition so we see the winner's
            // connection.
            let gate = CancellationToken::new();
            {
                let mut dialing = inner.lock_dialing();
                if dialing.contains_key(host) {
                    continue;
                }
                dialing.insert(host.to_string(), gate.clone());
            }
            // Removes the gate entry and wakes waiters no matter how the
            // dial ends, including this future being dropped mid-dial.
            let _gate = DialGate {
                dialing: &inner.dialing,
                host,
                token: gate,
            };

            if inner.config.debug {
                debug!(host, "sshpool dial");
            }

            let conn = match inner.connector.connect(&target).await {
                Ok(conn) => conn,
                Err(err) => return Err(Error::dial(host, err)),
            };

            let pooled = Arc::new(PooledConnection {
                conn,
                slots: Arc::new(Semaphore::new(inner.config.max_sessions)),
                id: inner.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1,
            });
            // Reserve the caller's slot before anyone else can see the
            // connection.
            let reserved = try_reserve(&pooled.slots);
            debug_assert!(reserved, "fresh connection must have a free slot");

            inner
                .lock_clients()
                .entry(host.to_string())
                .or_default()
                .push(Arc::clone(&pooled));

            return Ok((pooled, session_id));
        }
    }

    /// Open a session channel on `pooled`, retrying the server's
    /// "administratively prohibited" refusal with a short backoff. Any other
    /// error surfaces immediately; the caller releases the slot.
    async fn open_on(
        &self,
        pooled: &PooledConnection<C::Connection>,
    ) -> Result<<C::Connection as Connection>::Session> {
        let mut attempt = 0;
        loop {
            match pooled.conn.open_session().await {
                Ok(raw) => return Ok(raw),
                Err(Error::SessionLimit) if attempt < SESSION_OPEN_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(SESSION_OPEN_BACKOFF).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// See [`open_on`](Pool::open_on); same retry for the SFTP subsystem.
    async fn open_sftp_on(
        &self,
        pooled: &PooledConnection<C::Connection>,
    ) -> Result<<C::Connection as Connection>::Sftp> {
        let mut attempt = 0;
        loop {
            match pooled.conn.open_sftp().await {
                Ok(raw) => return Ok(raw),
                Err(Error::SessionLimit) if attempt < SESSION_OPEN_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(SESSION_OPEN_BACKOFF).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Non-blocking slot reservation: take a permit and forget it, so the slot
/// stays taken until someone calls `add_permits(1)`.
fn try_reserve(slots: &Arc<Semaphore>) -> bool {
    match Arc::clone(slots).try_acquire_owned() {
        Ok(permit) => {
            permit.forget();
            true
        }
        Err(_) => false,
    }
}

/// Block until any of the candidate connections frees a slot and reserve it.
/// Which connection wins when several free up together is whatever the
/// underlying multi-way wait picks.
async fn acquire_any_slot<T>(
    candidates: Vec<Arc<PooledConnection<T>>>,
) -> Result<Arc<PooledConnection<T>>> {
    if let [only] = candidates.as_slice() {
        let permit = Arc::clone(&only.slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        permit.forget();
        return Ok(Arc::clone(only));
    }

    let waits = candidates
        .iter()
        .map(|pooled| Box::pin(Arc::clone(&pooled.slots).acquire_owned()))
        .collect::<Vec<_>>();
    // The losers are dropped without consuming a permit.
    let (result, index, _) = select_all(waits).await;
    let permit = result.map_err(|_| Error::PoolClosed)?;
    permit.forget();
    Ok(Arc::clone(&candidates[index]))
}

/// Holds the dial gate for one host. Dropping it removes the registry entry
/// and cancels the token, releasing every waiter to re-enter acquisition.
struct DialGate<'a> {
    dialing: &'a Mutex<HashMap<String, CancellationToken>>,
    host: &'a str,
    token: CancellationToken,
}

impl Drop for DialGate<'_> {
    fn drop(&mut self) {
        self.dialing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.host);
        self.token.cancel();
    }
}
