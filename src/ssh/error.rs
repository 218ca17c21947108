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

use std::io;
use thiserror::Error;

/// Errors raised by the SSH session layer
#[derive(Debug, Error)]
pub enum Error {
    #[error("Address could not be resolved: {0}")]
    AddressInvalid(#[source] io::Error),

    #[error("SSH error: {0}")]
    SshError(#[from] russh::Error),

    #[error("Password authentication rejected for user '{0}'")]
    PasswordWrong(String),

    #[error("Failed to bind local forward on {address}: {source}")]
    LocalBind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Server refused remote forward on {address}: {source}")]
    ForwardRejected {
        address: String,
        #[source]
        source: russh::Error,
    },

    #[error("Server rejected command request: {0}")]
    CommandRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
