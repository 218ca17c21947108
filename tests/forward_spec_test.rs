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

//! Forward spec grammar, exercised through the public API.

use sshconnect::forwarding::{ForwardSpec, ForwardSpecError, PluginKind};

const DEFAULT_HOST: &str = "0.0.0.0";

fn parse(spec: &str) -> Result<ForwardSpec, ForwardSpecError> {
    ForwardSpec::parse(spec, DEFAULT_HOST)
}

#[test]
fn test_documented_forms() {
    let plain = parse("8080:example.com:80").unwrap();
    assert_eq!(plain.plugin, PluginKind::General);
    assert_eq!(plain.local_host, DEFAULT_HOST);
    assert_eq!((plain.local_port, plain.remote_port), (8080, 80));
    assert_eq!(plain.remote_host, "example.com");

    let ftp = parse("/ftp/127.0.0.1:21:ftp.example.com:21").unwrap();
    assert_eq!(ftp.plugin, PluginKind::FtpProxy);
    assert_eq!(ftp.local_host, "127.0.0.1");
    assert_eq!(ftp.local_port, 21);
    assert_eq!(ftp.remote_host, "ftp.example.com");

    let v6 = parse("[::1]:2222:remote.host:22").unwrap();
    assert_eq!(v6.local_host, "::1");
    assert_eq!(v6.local_port, 2222);
    assert_eq!(v6.remote_port, 22);

    let reuse = parse("9000:remote.onlyhost").unwrap();
    assert_eq!(reuse.remote_host, "remote.onlyhost");
    assert_eq!(reuse.remote_port, 9000);
}

#[test]
fn test_parsing_is_repeatable() {
    let spec = "/sniff/[::1]:2222:[fe80::2]:22";
    assert_eq!(parse(spec).unwrap(), parse(spec).unwrap());
}

#[test]
fn test_remote_bracketed_host() {
    let spec = parse("8443:[fe80::1]:443").unwrap();
    assert_eq!(spec.local_host, DEFAULT_HOST);
    assert_eq!(spec.remote_host, "fe80::1");
    assert_eq!(spec.remote_port, 443);
}

#[test]
fn test_unknown_plugin_is_general() {
    assert_eq!(parse("/socks/1080:h:80").unwrap().plugin, PluginKind::General);
}

#[test]
fn test_rejected_forms() {
    for bad in [
        "/ftp",
        ":80:host:22",
        "abc:host:80",
        "8080:host:http",
        "70000:host:80",
        "",
    ] {
        let err = parse(bad).unwrap_err();
        assert_eq!(
            err,
            ForwardSpecError::InvalidSpecFormat {
                spec: bad.to_string()
            },
            "{bad:?} should be rejected"
        );
    }
}
