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

//! Configuration type definitions.

use std::fmt;
use zeroize::Zeroizing;

use super::properties::Properties;
use super::utils::{parse_port, split_host_port};

pub const DEFAULT_PORT: u16 = 22;

/// Prefix of properties forwarded as the remote command's environment
pub const ENV_PREFIX: &str = "env.";

/// Forward direction, also the prefix of its numbered configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDirection {
    Local,
    Remote,
}

impl ForwardDirection {
    /// Configuration key of the entry at `index`, e.g. `local0`.
    pub fn key(self, index: usize) -> String {
        format!("{self}{index}")
    }
}

impl fmt::Display for ForwardDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardDirection::Local => write!(f, "local"),
            ForwardDirection::Remote => write!(f, "remote"),
        }
    }
}

/// What the run does after authenticating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode<'a> {
    /// Start configured forwards and hold the session open
    Forward,
    /// Run the given command only
    Command(&'a str),
}

/// Everything a run needs, resolved once at startup
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    password: Zeroizing<String>,
    pub command: Option<String>,
    pub environment: Vec<(String, String)>,
    properties: Properties,
}

impl ConnectionConfig {
    /// Resolve the configuration from parsed properties.
    ///
    /// A port embedded in `server` takes precedence over `port`.
    pub fn from_properties(mut properties: Properties, command: Option<String>) -> Self {
        let password = Zeroizing::new(properties.remove("password").unwrap_or_default());
        let configured_port = parse_port(properties.get("port"));
        let (host, port) = split_host_port(
            properties.get("server").unwrap_or_default(),
            configured_port,
        );
        let username = properties.get("username").unwrap_or_default().to_string();
        let environment = properties
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value.to_string()))
            })
            .collect();

        Self {
            host,
            port,
            username,
            password,
            command,
            environment,
            properties,
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Raw spec string of `local{index}` / `remote{index}`, if configured.
    pub fn forward_spec(&self, direction: ForwardDirection, index: usize) -> Option<&str> {
        self.properties.get(&direction.key(index))
    }

    /// A missing or blank command selects forward mode.
    pub fn run_mode(&self) -> RunMode<'_> {
        match self.command.as_deref() {
            Some(command) if !command.trim().is_empty() => RunMode::Command(command),
            _ => RunMode::Forward,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("command", &self.command)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}
