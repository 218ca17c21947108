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

//! Seed material handed to the session layer.
//!
//! The OS entropy device is preferred. Without it a digest of process and
//! system state is used instead; that fallback is low entropy and is not a
//! security guarantee.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncReadExt;
use tracing::warn;
use zeroize::Zeroizing;

pub const SEED_LEN: usize = 20;
pub const ENTROPY_DEVICE: &str = "/dev/urandom";

/// Where the seed bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    Device,
    SystemState,
}

impl fmt::Display for SeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedSource::Device => write!(f, "entropy device"),
            SeedSource::SystemState => write!(f, "system state (low entropy)"),
        }
    }
}

#[derive(Clone)]
pub struct RandomSeed {
    bytes: Zeroizing<[u8; SEED_LEN]>,
    source: SeedSource,
}

impl RandomSeed {
    pub async fn gather() -> Self {
        Self::gather_from(Path::new(ENTROPY_DEVICE)).await
    }

    pub async fn gather_from(device: &Path) -> Self {
        match read_device(device).await {
            Ok(bytes) => Self {
                bytes: Zeroizing::new(bytes),
                source: SeedSource::Device,
            },
            Err(e) => {
                warn!(
                    "Entropy device {} unavailable ({}), seeding from system state",
                    device.display(),
                    e
                );
                Self {
                    bytes: Zeroizing::new(system_state_seed()),
                    source: SeedSource::SystemState,
                }
            }
        }
    }

    pub fn source(&self) -> SeedSource {
        self.source
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }
}

impl fmt::Debug for RandomSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSeed")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

async fn read_device(path: &Path) -> io::Result<[u8; SEED_LEN]> {
    let mut device = tokio::fs::File::open(path).await?;
    let mut bytes = [0u8; SEED_LEN];
    device.read_exact(&mut bytes).await?;
    Ok(bytes)
}

fn system_state_seed() -> [u8; SEED_LEN] {
    let mut hasher = Sha256::new();

    if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
        hasher.update(now.as_nanos().to_le_bytes());
    }
    hasher.update(format!("{:?}", Instant::now()).as_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(format!("{:?}", std::thread::current().id()).as_bytes());
    for (key, value) in std::env::vars_os() {
        hasher.update(key.as_encoded_bytes());
        hasher.update(value.as_encoded_bytes());
    }
    hasher.update(std::env::temp_dir().as_os_str().as_encoded_bytes());
    if let Ok(cwd) = std::env::current_dir() {
        hasher.update(cwd.as_os_str().as_encoded_bytes());
    }
    // Stack address varies with ASLR
    let marker = 0u8;
    hasher.update((std::ptr::addr_of!(marker) as usize).to_le_bytes());

    let digest = hasher.finalize();
    let mut seed = [0u8; SEED_LEN];
    seed.copy_from_slice(&digest[..SEED_LEN]);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_seed_from_device() {
        let mut device = tempfile::NamedTempFile::new().unwrap();
        let material: Vec<u8> = (0u8..32).collect();
        device.write_all(&material).unwrap();

        let seed = RandomSeed::gather_from(device.path()).await;
        assert_eq!(seed.source(), SeedSource::Device);
        assert_eq!(seed.as_bytes(), &material[..SEED_LEN]);
    }

    #[tokio::test]
    async fn test_short_device_falls_back() {
        let mut device = tempfile::NamedTempFile::new().unwrap();
        device.write_all(&[1, 2, 3]).unwrap();

        let seed = RandomSeed::gather_from(device.path()).await;
        assert_eq!(seed.source(), SeedSource::SystemState);
        assert_eq!(seed.as_bytes().len(), SEED_LEN);
    }

    #[tokio::test]
    async fn test_missing_device_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let seed = RandomSeed::gather_from(&dir.path().join("no-such-device")).await;
        assert_eq!(seed.source(), SeedSource::SystemState);
        assert!(!format!("{seed:?}").contains("bytes"));
    }
}
