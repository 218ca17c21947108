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

//! Port forward specification parsing
//!
//! A forward spec is a compact string of the form:
//!
//! ```text
//! [/plugin/][local_host:]local_port:remote_host[:remote_port]
//! ```
//!
//! `local_host` and `remote_host` may be names, literal IPv4 addresses, or
//! literal IPv6 addresses enclosed in `[]`. When `remote_port` is missing the
//! local port is reused.
//!
//! # Examples
//!
//! ```rust
//! use sshconnect::forwarding::spec::{ForwardSpec, PluginKind};
//!
//! let spec = ForwardSpec::parse("8080:example.com:80", "0.0.0.0").unwrap();
//! assert_eq!(spec.local_host, "0.0.0.0");
//! assert_eq!(spec.remote_port, 80);
//!
//! let spec = ForwardSpec::parse("/ftp/127.0.0.1:21:ftp.example.com:21", "0.0.0.0").unwrap();
//! assert_eq!(spec.plugin, PluginKind::FtpProxy);
//! ```

use std::fmt;
use thiserror::Error;

/// Stream plugin attached to a forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Plain byte relay
    General,
    /// FTP control-channel proxy (`/ftp/`)
    FtpProxy,
    /// Diagnostic traffic dump (`/sniff/`)
    Sniffer,
}

impl PluginKind {
    /// Map a plugin segment name to its kind.
    ///
    /// Names are matched exactly; unknown names select no plugin.
    pub fn from_name(name: &str) -> Self {
        match name {
            "ftp" => PluginKind::FtpProxy,
            "sniff" => PluginKind::Sniffer,
            _ => PluginKind::General,
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::General => write!(f, "general"),
            PluginKind::FtpProxy => write!(f, "ftp"),
            PluginKind::Sniffer => write!(f, "sniff"),
        }
    }
}

/// Error returned for a malformed forward spec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardSpecError {
    #[error("Invalid port forward spec. {spec}")]
    InvalidSpecFormat { spec: String },
}

/// A parsed port forward specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub plugin: PluginKind,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl ForwardSpec {
    /// Parse a forward spec, using `default_local_host` when the spec names
    /// no local host.
    ///
    /// The local host is only recognised through one of three lookaheads,
    /// tried in order:
    /// 1. `[literal]:` at the start
    /// 2. a `[` preceded by at least two `:` (host runs up to the `[`)
    /// 3. no `[` at all and at least three `:` (host runs up to the first `:`)
    pub fn parse(spec: &str, default_local_host: &str) -> Result<Self, ForwardSpecError> {
        let invalid = || ForwardSpecError::InvalidSpecFormat {
            spec: spec.to_string(),
        };

        let (plugin, rest) = match spec.strip_prefix('/') {
            Some(after) => {
                let end = after.find('/').ok_or_else(invalid)?;
                (PluginKind::from_name(&after[..end]), &after[end + 1..])
            }
            None => (PluginKind::General, spec),
        };

        let (local_host, rest) = match split_local_host(rest) {
            Some((host, rest)) => (host.to_string(), rest),
            None => (default_local_host.to_string(), rest),
        };

        let (port_token, rest) = match rest.find(':') {
            Some(0) | None => return Err(invalid()),
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        };
        let local_port = parse_port(port_token).ok_or_else(invalid)?;

        let (remote_host, remote_port) = match split_bracketed(rest) {
            Some((host, port_token)) => (host, parse_port(port_token).ok_or_else(invalid)?),
            None => match rest.split_once(':') {
                Some((host, port_token)) => (host, parse_port(port_token).ok_or_else(invalid)?),
                // No port given: the whole remainder is the host and the
                // local port is reused.
                None => (rest, local_port),
            },
        };

        Ok(Self {
            plugin,
            local_host,
            local_port,
            remote_host: remote_host.to_string(),
            remote_port,
        })
    }
}

impl fmt::Display for ForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.plugin != PluginKind::General {
            write!(f, "[{}] ", self.plugin)?;
        }
        write!(
            f,
            "{}:{}→{}:{}",
            self.local_host, self.local_port, self.remote_host, self.remote_port
        )
    }
}

/// Split `[literal]:rest` into `(literal, rest)`.
fn split_bracketed(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix('[')?;
    let close = inner.find(']')?;
    let rest = inner[close + 1..].strip_prefix(':')?;
    Some((&inner[..close], rest))
}

fn split_local_host(s: &str) -> Option<(&str, &str)> {
    if let Some((host, rest)) = split_bracketed(s) {
        return (!host.is_empty()).then_some((host, rest));
    }

    match s.find('[') {
        Some(bracket) => {
            let colons_before = s[..bracket].matches(':').count();
            (colons_before >= 2).then(|| (&s[..bracket], &s[bracket + 1..]))
        }
        None => {
            if s.matches(':').count() < 3 {
                return None;
            }
            // count >= 3 guarantees a first colon
            let first = s.find(':')?;
            (first > 0).then(|| (&s[..first], &s[first + 1..]))
        }
    }
}

fn parse_port(token: &str) -> Option<u16> {
    token.parse::<u16>().ok()
}
