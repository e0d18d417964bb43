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

//! An in-memory transport for exercising the pool without an SSH server.
//!
//! Counts dials (total and concurrently in flight), records dial targets,
//! can be told to fail dials or refuse session opens, and tracks how many
//! sessions are live on each fake connection so tests can check the slot
//! bound. Direct-tcpip channels are loopback echo streams.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sshpool::{Connection, Connector, Error, Result, Target};

/// Honor `RUST_LOG` when a test run wants tracing output.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

#[derive(Default)]
pub struct FakeState {
    /// How long each dial takes; widens race windows.
    pub dial_delay: Duration,
    /// Total dial attempts, failures included.
    pub dials: AtomicUsize,
    dials_in_flight: AtomicUsize,
    /// High-water mark of concurrent dials; the single-dial property wants
    /// this to stay at 1 per host.
    pub max_dials_in_flight: AtomicUsize,
    /// Fail this many upcoming dials.
    pub fail_dials: AtomicUsize,
    /// Refuse this many upcoming session opens with the server's
    /// session-limit signature.
    pub session_refusals: AtomicUsize,
    /// Every target passed to connect, in order.
    pub targets: Mutex<Vec<Target>>,
    /// Every connection handed out, in order.
    pub connections: Mutex<Vec<Arc<FakeConnState>>>,
    /// Every direct-tcpip endpoint opened, in order.
    pub tcpip_targets: Mutex<Vec<(String, u16)>>,
}

impl FakeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_dial_delay(dial_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            dial_delay,
            ..Self::default()
        })
    }

    pub fn connector(self: &Arc<Self>) -> FakeConnector {
        FakeConnector {
            state: Arc::clone(self),
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnState> {
        Arc::clone(&self.connections.lock().unwrap()[index])
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[derive(Default)]
pub struct FakeConnState {
    pub active_sessions: AtomicUsize,
    pub max_active_sessions: AtomicUsize,
    pub closed: AtomicBool,
}

pub struct FakeConnector {
    state: Arc<FakeState>,
}

pub struct FakeConnection {
    state: Arc<FakeState>,
    conn: Arc<FakeConnState>,
}

/// Held by callers; decrements the live-session count when dropped.
pub struct FakeSession {
    conn: Arc<FakeConnState>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.conn.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrement-if-positive, for consuming injected failure budgets.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, target: &Target) -> Result<FakeConnection> {
        let state = &self.state;
        state.dials.fetch_add(1, Ordering::SeqCst);
        let in_flight = state.dials_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state
            .max_dials_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        if !state.dial_delay.is_zero() {
            tokio::time::sleep(state.dial_delay).await;
        }
        state.dials_in_flight.fetch_sub(1, Ordering::SeqCst);
        state.targets.lock().unwrap().push(target.clone());

        if take_one(&state.fail_dials) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "dial refused",
            )));
        }

        let conn = Arc::new(FakeConnState::default());
        state.connections.lock().unwrap().push(Arc::clone(&conn));
        Ok(FakeConnection {
            state: Arc::clone(state),
            conn,
        })
    }
}

impl FakeConnection {
    fn open_one(&self) -> Result<FakeSession> {
        if self.conn.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        if take_one(&self.state.session_refusals) {
            return Err(Error::SessionLimit);
        }
        let active = self.conn.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.conn
            .max_active_sessions
            .fetch_max(active, Ordering::SeqCst);
        Ok(FakeSession {
            conn: Arc::clone(&self.conn),
        })
    }
}

#[async_trait]
impl Connection for FakeConnection {
    type Session = FakeSession;
    type Sftp = FakeSession;
    type Stream = tokio::io::DuplexStream;

    async fn open_session(&self) -> Result<FakeSession> {
        self.open_one()
    }

    async fn open_sftp(&self) -> Result<FakeSession> {
        self.open_one()
    }

    async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<Self::Stream> {
        if self.conn.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        self.state
            .tcpip_targets
            .lock()
            .unwrap()
            .push((host.to_string(), port));

        // The far end echoes until the near side shuts down.
        let (near, far) = tokio::io::duplex(16 * 1024);
        tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(far);
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });
        Ok(near)
    }

    async fn close(&self) -> Result<()> {
        self.conn.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
