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

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sshconnect",
    version,
    about = "SSH connector - port forwarding and single remote command execution",
    long_about = "sshconnect opens a password-authenticated SSH session described by a properties file.\nWithout a command it starts the configured local and remote forwards and holds the session open\nwith a keepalive command. With a command it runs that command once and exits with its status.",
    after_help = "EXAMPLES:\n  Start configured forwards:  sshconnect -p tunnel.properties\n  Run a single command:       sshconnect -p host.properties -c \"uname -a\"\n\nPROPERTIES:\n  server, port, username, password\n  local0..local31, remote0..remote31   [/plugin/][bind_host:]bind_port:dest_host:dest_port\n  env.NAME                             environment of the dispatched command"
)]
pub struct Cli {
    #[arg(
        short = 'c',
        long,
        visible_alias = "cl",
        help = "Command line to run remotely; forward mode when omitted or blank"
    )]
    pub command: Option<String>,

    #[arg(
        short = 'p',
        long,
        visible_alias = "pr",
        default_value = "ssh.properties",
        help = "Properties file with connection and forward settings"
    )]
    pub properties: PathBuf,

    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["sshconnect"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.properties, PathBuf::from("ssh.properties"));
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_aliases() {
        let cli = Cli::parse_from(["sshconnect", "--cl", "ls -l", "--pr", "other.properties", "-vv"]);
        assert_eq!(cli.command.as_deref(), Some("ls -l"));
        assert_eq!(cli.properties, PathBuf::from("other.properties"));
        assert_eq!(cli.verbose, 2);
    }
}
