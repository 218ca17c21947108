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
use tracing::{error, info};

use sshconnect::{
    cli::Cli, config::ConnectionConfig, connector::ConnectionOrchestrator, ssh::RusshConnector,
    utils::init_logging,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("Using property file {}", cli.properties.display());
    let config = ConnectionConfig::load(&cli.properties, cli.command).await;

    let orchestrator = ConnectionOrchestrator::new(RusshConnector::default(), config);
    let code = match orchestrator.run(&mut tokio::io::stdout()).await {
        Ok(status) => status,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    std::process::exit(code);
}
