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

//! Authentication material and the server host key policy.
//!
//! Only non-interactive methods: a pooling library has nobody to prompt.
//! Secrets are held in [`Zeroizing`] wrappers so they are wiped on drop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::{Handle, Handler};
use zeroize::Zeroizing;

use crate::error::Error;

/// An authentication token used for every dial of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    PrivateKey {
        /// entire contents of a private key file
        key_data: Zeroizing<String>,
        key_pass: Option<Zeroizing<String>>,
    },
    PrivateKeyFile {
        key_file_path: PathBuf,
        key_pass: Option<Zeroizing<String>>,
    },
    #[cfg(not(target_os = "windows"))]
    Agent,
}

impl AuthMethod {
    pub fn with_password(password: &str) -> Self {
        Self::Password(Zeroizing::new(password.to_string()))
    }

    pub fn with_key(key: &str, passphrase: Option<&str>) -> Self {
        Self::PrivateKey {
            key_data: Zeroizing::new(key.to_string()),
            key_pass: passphrase.map(|p| Zeroizing::new(p.to_string())),
        }
    }

    pub fn with_key_file<T: AsRef<Path>>(key_file_path: T, passphrase: Option<&str>) -> Self {
        Self::PrivateKeyFile {
            key_file_path: key_file_path.as_ref().to_path_buf(),
            key_pass: passphrase.map(|p| Zeroizing::new(p.to_string())),
        }
    }

    /// Authenticate with whatever identities the SSH agent offers. Requires
    /// a running agent and `SSH_AUTH_SOCK`. Unix only.
    #[cfg(not(target_os = "windows"))]
    pub fn with_agent() -> Self {
        Self::Agent
    }
}

/// Server host key verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ServerCheckMethod {
    /// Accept any host key (insecure, for testing only)
    NoCheck,
    /// base64 encoded key without the type prefix or hostname suffix
    PublicKey(String),
    PublicKeyFile(String),
    DefaultKnownHostsFile,
    KnownHostsFile(String),
}

impl ServerCheckMethod {
    pub fn with_public_key(key: &str) -> Self {
        Self::PublicKey(key.to_string())
    }

    pub fn with_public_key_file(key_file_name: &str) -> Self {
        Self::PublicKeyFile(key_file_name.to_string())
    }

    pub fn with_known_hosts_file(known_hosts_file: &str) -> Self {
        Self::KnownHostsFile(known_hosts_file.to_string())
    }
}

/// Run the given method against a freshly connected handle.
pub(super) async fn authenticate<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    auth: AuthMethod,
) -> Result<(), Error> {
    match auth {
        AuthMethod::Password(password) => {
            let authenticated = handle
                .authenticate_password(username, &**password)
                .await
                .map_err(Error::Ssh)?;
            if !authenticated.success() {
                return Err(Error::PasswordWrong);
            }
        }
        AuthMethod::PrivateKey { key_data, key_pass } => {
            let key = russh::keys::decode_secret_key(&key_data, key_pass.as_ref().map(|p| &***p))
                .map_err(Error::KeyInvalid)?;
            authenticate_with_key(handle, username, key).await?;
        }
        AuthMethod::PrivateKeyFile {
            key_file_path,
            key_pass,
        } => {
            let key =
                russh::keys::load_secret_key(key_file_path, key_pass.as_ref().map(|p| &***p))
                    .map_err(Error::KeyInvalid)?;
            authenticate_with_key(handle, username, key).await?;
        }
        #[cfg(not(target_os = "windows"))]
        AuthMethod::Agent => {
            let mut agent = russh::keys::agent::client::AgentClient::connect_env()
                .await
                .map_err(|_| Error::AgentConnectionFailed)?;

            let identities = agent
                .request_identities()
                .await
                .map_err(|_| Error::AgentConnectionFailed)?;
            if identities.is_empty() {
                return Err(Error::AgentNoIdentities);
            }

            let mut authenticated = false;
            for identity in identities {
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(Error::Ssh)?
                    .flatten();
                let result = handle
                    .authenticate_publickey_with(username, identity, hash, &mut agent)
                    .await;
                if let Ok(auth_result) = result {
                    if auth_result.success() {
                        authenticated = true;
                        break;
                    }
                }
            }
            if !authenticated {
                return Err(Error::AgentAuthFailed);
            }
        }
    }
    Ok(())
}

async fn authenticate_with_key<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    key: russh::keys::PrivateKey,
) -> Result<(), Error> {
    let hash = handle
        .best_supported_rsa_hash()
        .await
        .map_err(Error::Ssh)?
        .flatten();
    let authenticated = handle
        .authenticate_publickey(
            username,
            russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash),
        )
        .await
        .map_err(Error::Ssh)?;
    if !authenticated.success() {
        return Err(Error::KeyAuthFailed);
    }
    Ok(())
}
