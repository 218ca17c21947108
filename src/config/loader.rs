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

//! Configuration loading.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

use super::properties::Properties;
use super::types::ConnectionConfig;
use super::utils::expand_tilde;

impl Properties {
    /// Read and parse a properties file.
    ///
    /// Files that are not valid UTF-8 are decoded as ISO-8859-1, the
    /// traditional encoding of the format.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);
        let bytes = fs::read(&expanded_path).await.with_context(|| {
            format!(
                "Failed to read properties file at {}",
                expanded_path.display()
            )
        })?;

        let content = String::from_utf8(bytes)
            .unwrap_or_else(|e| e.into_bytes().iter().map(|&b| char::from(b)).collect());
        Ok(Self::parse(&content))
    }
}

impl ConnectionConfig {
    /// Load the configuration for a run.
    ///
    /// An unreadable file is not fatal: it is reported and the run proceeds
    /// with empty properties.
    pub async fn load(path: &Path, command: Option<String>) -> Self {
        let properties = match Properties::load(path).await {
            Ok(properties) => properties,
            Err(e) => {
                tracing::warn!("Error loading properties: {:#}", e);
                Properties::default()
            }
        };
        Self::from_properties(properties, command)
    }
}
