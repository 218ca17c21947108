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

//! Configuration utility functions.

use std::path::{Path, PathBuf};

use super::types::DEFAULT_PORT;

/// Expand tilde (~) in path to home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if path_str.starts_with("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(path_str.replacen("~", &home, 1));
            }
        }
    }
    path.to_path_buf()
}

/// Parse a configured port, falling back to 22.
pub fn parse_port(value: Option<&str>) -> u16 {
    value
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Split a `server` value that may carry its own port.
///
/// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`. A bare IPv6 literal
/// (more than one `:`) is returned unchanged. When the embedded port is
/// missing or invalid `default_port` is used.
pub fn split_host_port(server: &str, default_port: u16) -> (String, u16) {
    if let Some(inner) = server.strip_prefix('[') {
        if let Some((host, rest)) = inner.split_once(']') {
            let port = rest
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }

    match server.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            (host.to_string(), port.parse().unwrap_or(default_port))
        }
        _ => (server.to_string(), default_port),
    }
}
