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

//! `.properties` file format.
//!
//! Supports the syntax commonly found in such files:
//!
//! ```text
//! # comment            ! also a comment
//! server = ssh.example.com
//! port: 2222
//! username alice
//! local0 = /sniff/127.0.0.1:8080:\
//!          intranet:80
//! motd = caf\u00e9\tbar
//! ```
//!
//! The key ends at the first unescaped `=`, `:` or whitespace. A later
//! duplicate key replaces an earlier one. Leading whitespace of a
//! continuation line is dropped.

use std::collections::BTreeMap;

const WHITESPACE: [char; 3] = [' ', '\t', '\x0c'];

/// Parsed key/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn parse(content: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut lines = content.lines();

        while let Some(line) = lines.next() {
            let line = line.trim_start_matches(WHITESPACE);
            if line.is_empty() || line.starts_with(['#', '!']) {
                continue;
            }

            let mut logical = String::new();
            let mut current = line;
            while ends_with_continuation(current) {
                logical.push_str(&current[..current.len() - 1]);
                match lines.next() {
                    Some(next) => current = next.trim_start_matches(WHITESPACE),
                    None => {
                        current = "";
                        break;
                    }
                }
            }
            logical.push_str(current);

            let (key, value) = split_key_value(&logical);
            entries.insert(unescape(key), unescape(value));
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = i;
                break;
            }
            c if WHITESPACE.contains(&c) => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let mut value = line[key_end..].trim_start_matches(WHITESPACE);
    if let Some(rest) = value.strip_prefix(['=', ':']) {
        value = rest.trim_start_matches(WHITESPACE);
    }
    (key, value)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => out.push(decoded),
                    // Malformed escapes are kept verbatim
                    _ => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
