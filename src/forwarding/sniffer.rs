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

//! Traffic dump for `/sniff/` forwards.
//!
//! Every chunk relayed through a sniffed forward is logged as a hex/ASCII
//! dump under the `sshconnect::sniffer` target, so it can be enabled on its
//! own with `RUST_LOG=sshconnect::sniffer=info`.

use std::fmt::Write;
use tracing::info;

use super::filter::Direction;

const BYTES_PER_ROW: usize = 16;

/// Logs relayed bytes for one connection.
#[derive(Debug, Clone)]
pub struct Sniffer {
    peer: String,
    target: String,
}

impl Sniffer {
    pub fn new(peer: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            target: target.into(),
        }
    }

    pub fn record(&self, direction: Direction, data: &[u8]) {
        info!(
            target: "sshconnect::sniffer",
            "{} {} {} ({} bytes)\n{}",
            self.peer,
            direction,
            self.target,
            data.len(),
            hex_dump(data)
        );
    }
}

/// Render `data` as offset, hex and printable-ASCII columns.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);
    for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:08x}  ", row * BYTES_PER_ROW);
        for i in 0..BYTES_PER_ROW {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('|');
    }
    out
}
