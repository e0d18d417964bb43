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

use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use crate::error::{Error, Result};

/// One session channel, ready to run a single remote command.
///
/// An SSH session channel executes exactly one command; acquire a fresh
/// session from the pool for each command. Every invocation is a new shell
/// context, so `cd`, variables and the like do not carry over.
pub struct RemoteSession {
    channel: Channel<Msg>,
}

/// Collected output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The unix exit status (`$?` in a shell).
    pub exit_status: u32,
}

impl RemoteSession {
    pub(crate) fn new(channel: Channel<Msg>) -> Self {
        Self { channel }
    }

    /// Run `command` and collect stdout and stderr separately.
    pub async fn exec(&mut self, command: &str) -> Result<ExecResult> {
        self.run(command, false).await
    }

    /// Run `command` with stderr interleaved into stdout in arrival order.
    pub async fn exec_combined(&mut self, command: &str) -> Result<ExecResult> {
        self.run(command, true).await
    }

    async fn run(&mut self, command: &str, combine: bool) -> Result<ExecResult> {
        self.channel.exec(true, command).await.map_err(Error::Ssh)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    if combine {
                        stdout.extend_from_slice(data);
                    } else {
                        stderr.extend_from_slice(data);
                    }
                }
                // An exit report does not mean end of communications; data
                // may still be in flight, so keep draining until the channel
                // closes.
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        match exit_status {
            Some(status) => Ok(ExecResult {
                stdout,
                stderr,
                exit_status: status,
            }),
            None => Err(Error::CommandDidntExit),
        }
    }
}
