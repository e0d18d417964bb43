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

//! One-shot command execution on top of the pool.
//!
//! Each call acquires a session, runs the command, and releases the session,
//! so fanning hundreds of these out across hosts is exactly what the pool's
//! admission control is for. Failures carry the host, the command, and a
//! bounded excerpt of whatever the command printed.

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::ssh::SshConnector;

const CONTEXT_START: usize = 512;
const CONTEXT_END: usize = 512;

impl Pool<SshConnector> {
    /// Run `command` on `host` and return its stdout. A non-zero exit
    /// status is an error that includes the captured stdout for context.
    pub async fn exec_output(&self, host: &str, command: &str) -> Result<Vec<u8>> {
        let mut session = self
            .get(host)
            .await
            .map_err(|err| Error::exec(host, command, err.to_string()))?;
        let result = session.exec(command).await;
        drop(session);

        match result {
            Ok(out) if out.exit_status == 0 => Ok(out.stdout),
            Ok(out) => Err(wrap_output_error(
                &out.stdout,
                &format!("exit status {}", out.exit_status),
                host,
                command,
            )),
            Err(err) => Err(Error::exec(host, command, err.to_string())),
        }
    }

    /// Like [`exec_output`](Pool::exec_output) but with stderr interleaved
    /// into the returned bytes, and into the error context on failure.
    pub async fn exec_combined_output(&self, host: &str, command: &str) -> Result<Vec<u8>> {
        let mut session = self
            .get(host)
            .await
            .map_err(|err| Error::exec(host, command, err.to_string()))?;
        let result = session.exec_combined(command).await;
        drop(session);

        match result {
            Ok(out) if out.exit_status == 0 => Ok(out.stdout),
            Ok(out) => Err(wrap_output_error(
                &out.stdout,
                &format!("exit status {}", out.exit_status),
                host,
                command,
            )),
            Err(err) => Err(Error::exec(host, command, err.to_string())),
        }
    }

    /// [`exec_output`](Pool::exec_output) decoded as lossy UTF-8.
    pub async fn exec_output_string(&self, host: &str, command: &str) -> Result<String> {
        let out = self.exec_output(host, command).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// [`exec_combined_output`](Pool::exec_combined_output) decoded as lossy
    /// UTF-8.
    pub async fn exec_combined_output_string(&self, host: &str, command: &str) -> Result<String> {
        let out = self.exec_combined_output(host, command).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Attach command output to an error message. Short output goes in
/// verbatim; anything over `CONTEXT_START + CONTEXT_END` bytes is elided
/// down to its head and tail.
fn wrap_output_error(output: &[u8], cause: &str, host: &str, command: &str) -> Error {
    let mut message = cause.to_string();
    if !output.is_empty() {
        message.push_str(": ");
        if output.len() > CONTEXT_START + CONTEXT_END {
            message.push_str(&String::from_utf8_lossy(&output[..CONTEXT_START]));
            message.push_str(" ... (trimmed output) ... ");
            message.push_str(&String::from_utf8_lossy(
                &output[output.len() - CONTEXT_END..],
            ));
        } else {
            message.push_str(&String::from_utf8_lossy(output));
        }
    }
    Error::exec(host, command, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_included_verbatim() {
        let err = wrap_output_error(b"command not found", "exit status 127", "h1", "frob");
        let msg = err.to_string();
        assert!(msg.contains("h1"));
        assert!(msg.contains("\"frob\""));
        assert!(msg.contains("exit status 127: command not found"));
        assert!(!msg.contains("(trimmed output)"));
    }

    #[test]
    fn test_exactly_at_limit_not_trimmed() {
        let output = vec![b'x'; CONTEXT_START + CONTEXT_END];
        let err = wrap_output_error(&output, "exit status 1", "h1", "frob");
        assert!(!err.to_string().contains("(trimmed output)"));
    }

    #[test]
    fn test_long_output_trimmed_to_head_and_tail() {
        let mut output = Vec::new();
        output.extend_from_slice(&[b'a'; 600]);
        output.extend_from_slice(&[b'b'; 600]);
        let err = wrap_output_error(&output, "exit status 1", "h1", "frob");
        let msg = err.to_string();
        assert!(msg.contains(" ... (trimmed output) ... "));
        // Head is the first 512 bytes, tail the last 512.
        assert!(msg.contains(&"a".repeat(512)));
        assert!(msg.contains(&"b".repeat(512)));
        assert!(!msg.contains(&"a".repeat(513)));
        assert!(!msg.contains(&"b".repeat(513)));
    }

    #[test]
    fn test_empty_output_adds_no_context() {
        let err = wrap_output_error(b"", "exit status 1", "h1", "frob");
        let msg = err.to_string();
        assert!(msg.ends_with("exit status 1"));
    }
}
