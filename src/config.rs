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

use std::time::Duration;

/// Default per-connection session cap, matching the stock
/// `/etc/ssh/sshd_config` value. Most servers never set `MaxSessions`, so
/// they run with this limit of 10.
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Default per-host connection cap. A tradeoff between how long callers wait
/// for dials and how long they wait for concurrent operations to finish.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Default quiet period between closing a session and returning its slot.
/// Found by testing; 10ms was almost enough (roughly 3 in 1000 would fail).
pub const DEFAULT_SESSION_CLOSE_DELAY: Duration = Duration::from_millis(20);

/// Pool limits and diagnostics.
///
/// All fields are optional in the sense that a zero value falls back to the
/// matching default when the pool is constructed.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent sessions per connection. Should match or stay
    /// below the server's `MaxSessions`.
    pub max_sessions: usize,

    /// Maximum connections to the same host. Each connection can carry up to
    /// `max_sessions` concurrent channels. Setting this to 1 is not a bad
    /// idea if you want to be gentle to your servers.
    pub max_connections: usize,

    /// SSH servers take a moment to clean up a session after it closes.
    /// Waiting this long before handing the slot out again prevents
    /// "no more sessions" errors from the server.
    pub session_close_delay: Duration,

    /// Emit diagnostics on dial and shutdown.
    pub debug: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            session_close_delay: DEFAULT_SESSION_CLOSE_DELAY,
            debug: false,
        }
    }
}

impl PoolConfig {
    /// Replace zero values with their defaults. Applied once when the pool
    /// is built so the hot paths never re-check.
    pub(crate) fn normalized(mut self) -> Self {
        if self.max_sessions == 0 {
            self.max_sessions = DEFAULT_MAX_SESSIONS;
        }
        if self.max_connections == 0 {
            self.max_connections = DEFAULT_MAX_CONNECTIONS;
        }
        if self.session_close_delay.is_zero() {
            self.session_close_delay = DEFAULT_SESSION_CLOSE_DELAY;
        }
        self
    }
}
