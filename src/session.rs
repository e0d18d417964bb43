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

//! Session handles returned by the pool.
//!
//! A handle wraps one live channel plus the slot reservation that admitted
//! it. Dropping the handle returns the slot after the pool's close delay;
//! the channel itself closes with the wrapped object. Handles never own
//! their connection, so they stay safe to drop after the pool shuts down.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::transport::{Connection, Connector};

/// A reserved session slot on one connection.
///
/// Dropping it schedules `add_permits(1)` on the slot semaphore after the
/// configured delay. The server needs that quiet period to finish its own
/// session accounting; returning the slot eagerly makes the next open likely
/// to fail with "no more sessions".
pub(crate) struct SlotReservation {
    slots: Arc<Semaphore>,
    delay: Duration,
}

impl SlotReservation {
    pub(crate) fn new(slots: Arc<Semaphore>, delay: Duration) -> Self {
        Self { slots, delay }
    }

    /// Return the slot without the quiet period. Used when a channel open
    /// fails and the slot was never actually occupied.
    pub(crate) fn release_now(mut self) {
        self.delay = Duration::ZERO;
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        let slots = Arc::clone(&self.slots);
        if self.delay.is_zero() {
            slots.add_permits(1);
            return;
        }
        let delay = self.delay;
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    slots.add_permits(1);
                });
            }
            // No runtime left to sleep on; the permit still has to go back.
            Err(_) => slots.add_permits(1),
        }
    }
}

/// A pooled SSH session.
///
/// Derefs to the connector's session type (for the russh backend,
/// [`crate::ssh::RemoteSession`]). Dropping the handle releases its slot
/// after the pool's `session_close_delay`.
pub struct Session<C: Connector> {
    raw: <C::Connection as Connection>::Session,
    _slot: SlotReservation,
    host: String,
    session_id: u64,
    connection_id: u64,
}

impl<C: Connector> Session<C> {
    pub(crate) fn new(
        raw: <C::Connection as Connection>::Session,
        slot: SlotReservation,
        host: &str,
        session_id: u64,
        connection_id: u64,
    ) -> Self {
        Self {
            raw,
            _slot: slot,
            host: host.to_string(),
            session_id,
            connection_id,
        }
    }

    /// The globally monotonic ID assigned when this acquisition entered the
    /// pool.
    pub fn id(&self) -> u64 {
        self.session_id
    }

    /// ID of the pooled connection carrying this session.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// The host string this session was acquired for, as the caller passed it.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Release the session back to the pool. Equivalent to dropping the
    /// handle; provided for call sites that want the hand-back explicit.
    pub fn release(self) {}
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("session_id", &self.session_id)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl<C: Connector> Deref for Session<C> {
    type Target = <C::Connection as Connection>::Session;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl<C: Connector> DerefMut for Session<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.raw
    }
}

impl<C: Connector> fmt::Display for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ssh session {} host {}", self.session_id, self.host)
    }
}

/// A pooled SFTP session. Same lifecycle as [`Session`], wrapping the
/// connector's SFTP client type instead of a raw session channel.
pub struct SftpSession<C: Connector> {
    raw: <C::Connection as Connection>::Sftp,
    _slot: SlotReservation,
    host: String,
    session_id: u64,
    connection_id: u64,
}

impl<C: Connector> SftpSession<C> {
    pub(crate) fn new(
        raw: <C::Connection as Connection>::Sftp,
        slot: SlotReservation,
        host: &str,
        session_id: u64,
        connection_id: u64,
    ) -> Self {
        Self {
            raw,
            _slot: slot,
            host: host.to_string(),
            session_id,
            connection_id,
        }
    }

    pub fn id(&self) -> u64 {
        self.session_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Release the session back to the pool. Equivalent to dropping the
    /// handle.
    pub fn release(self) {}
}

impl<C: Connector> Deref for SftpSession<C> {
    type Target = <C::Connection as Connection>::Sftp;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl<C: Connector> DerefMut for SftpSession<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.raw
    }
}

impl<C: Connector> fmt::Display for SftpSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sftp session {} host {}", self.session_id, self.host)
    }
}
