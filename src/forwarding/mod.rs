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

//! Port forwarding
//!
//! - [`spec`]: parsing of `[/plugin/][local_host:]local_port:remote_host[:remote_port]`
//! - [`manager`]: scanning of the `localN`/`remoteN` configuration entries
//! - [`local`], [`remote`], [`tunnel`]: the russh-backed forward runtime
//! - [`filter`], [`ftp`], [`sniffer`]: optional per-forward stream plugins

pub mod filter;
pub mod ftp;
pub mod local;
pub mod manager;
pub mod remote;
pub mod sniffer;
pub mod spec;
pub mod tunnel;

pub use filter::StreamFilter;
pub use manager::{ForwardManager, ForwardSummary};
pub use spec::{ForwardSpec, ForwardSpecError, PluginKind};

/// Bind address used when a spec names no local host
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Highest number of entries scanned per direction
pub const MAX_FORWARDS: usize = 32;
