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

use std::fmt;

use crate::error::{Error, Result};

/// A parsed `[user@]host[:port]` target.
///
/// The raw string a caller hands the pool stays the registry key; this type
/// only carries the pieces a connector needs for the actual dial. A leading
/// `user@` overrides the connector's configured user for that dial alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Parse one of:
    /// - `host`
    /// - `host:port`
    /// - `user@host`
    /// - `user@host:port`
    pub fn parse(target: &str) -> Result<Self> {
        let (user, rest) = match target.find('@') {
            Some(at) => {
                let user = &target[..at];
                if user.is_empty() {
                    return Err(Error::InvalidTarget(target.to_string()));
                }
                (Some(user.to_string()), &target[at + 1..])
            }
            None => (None, target),
        };

        let (host, port) = match rest.rfind(':') {
            Some(colon) => {
                let port = rest[colon + 1..]
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidTarget(target.to_string()))?;
                (&rest[..colon], port)
            }
            None => (rest, 22),
        };

        if host.is_empty() {
            return Err(Error::InvalidTarget(target.to_string()));
        }

        Ok(Target {
            user,
            host: host.to_string(),
            port,
        })
    }

    /// The `host:port` form used for the TCP connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}:{}", user, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
