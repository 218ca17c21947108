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

//! Starts the forwards declared in the configuration.
//!
//! Entries are read as `local0`, `local1`, ... and `remote0`, `remote1`, ...
//! up to [`MAX_FORWARDS`] per direction. Scanning a direction stops at the
//! first missing index, so `local0`, `local2` only starts `local0`.
//!
//! Failure policy differs per direction:
//! - a local forward that cannot be parsed or bound is logged and skipped
//! - a remote forward that cannot be parsed or is refused aborts the run

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use super::filter::StreamFilter;
use super::spec::{ForwardSpec, PluginKind};
use super::{DEFAULT_BIND_HOST, MAX_FORWARDS};
use crate::config::{ConnectionConfig, ForwardDirection};
use crate::ssh::RemoteSession;

/// What a [`ForwardManager`] run started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    pub local_started: usize,
    pub local_failed: usize,
    pub remote_started: usize,
}

/// Registers configured forwards on a session
pub struct ForwardManager<'a, S: RemoteSession> {
    session: &'a S,
    config: &'a ConnectionConfig,
}

impl<'a, S: RemoteSession> ForwardManager<'a, S> {
    pub fn new(session: &'a S, config: &'a ConnectionConfig) -> Self {
        Self { session, config }
    }

    /// Start all local forwards, then all remote forwards.
    pub async fn start_all(&self) -> Result<ForwardSummary> {
        let mut summary = self.start_local_forwards().await;
        summary.remote_started = self.start_remote_forwards().await?;
        Ok(summary)
    }

    /// Start local forwards; failures never abort the scan.
    pub async fn start_local_forwards(&self) -> ForwardSummary {
        let mut summary = ForwardSummary::default();

        for (index, raw) in configured_specs(self.config, ForwardDirection::Local) {
            let spec = match ForwardSpec::parse(raw, DEFAULT_BIND_HOST) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("Skipping local{}: {}", index, e);
                    summary.local_failed += 1;
                    continue;
                }
            };

            let filter = StreamFilter::for_plugin(spec.plugin, &spec.local_host, &self.config.host);
            match self
                .session
                .register_local_forward(
                    &spec.local_host,
                    spec.local_port,
                    &spec.remote_host,
                    spec.remote_port,
                    filter,
                )
                .await
            {
                Ok(()) => {
                    info!("started local forward: {}", raw);
                    summary.local_started += 1;
                }
                Err(e) => {
                    error!("failed local forward: {}: {}", raw, e);
                    summary.local_failed += 1;
                }
            }
        }

        summary
    }

    /// Start remote forwards; the first failure is returned.
    pub async fn start_remote_forwards(&self) -> Result<usize> {
        let mut started = 0;

        for (index, raw) in configured_specs(self.config, ForwardDirection::Remote) {
            let spec = ForwardSpec::parse(raw, DEFAULT_BIND_HOST)
                .with_context(|| format!("failed remote forward: remote{index}"))?;

            if spec.plugin != PluginKind::General {
                warn!(
                    "Ignoring {} plugin on remote{}: remote forwards are not filtered",
                    spec.plugin, index
                );
            }
            self.session
                .register_remote_forward(
                    &spec.local_host,
                    spec.local_port,
                    &spec.remote_host,
                    spec.remote_port,
                )
                .await
                .with_context(|| format!("failed remote forward: {raw}"))?;

            info!("started remote forward: {}", raw);
            started += 1;
        }

        Ok(started)
    }
}

/// Configured spec strings of one direction, in index order, up to the
/// first gap.
pub fn configured_specs(
    config: &ConnectionConfig,
    direction: ForwardDirection,
) -> impl Iterator<Item = (usize, &str)> {
    (0..MAX_FORWARDS).map_while(move |index| {
        config
            .forward_spec(direction, index)
            .map(|spec| (index, spec))
    })
}
