// Copyright 2021 Datafuse Labs
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use log::{LevelFilter, info};
use prom_query_hints::{
    app::{AppConfig, AppState, router},
    error::AppError,
    hints::{DEFAULT_RATE_INTERVAL, SUM_HINT_THRESHOLD_COUNT},
};

#[derive(Debug, Parser)]
#[command(author, version, about, disable_help_subcommand = true)]
struct Args {
    /// HTTP bind address for the hint server
    #[arg(long = "bind", env = "HINTS_BIND_ADDR", default_value = "0.0.0.0:3200")]
    bind: SocketAddr,
    /// JSON file with metric metadata, either a flat map or a /api/v1/metadata response
    #[arg(long = "metadata-file", env = "METADATA_FILE")]
    metadata_file: Option<PathBuf>,
    /// JSON file with recording rules, either a rule mapping or a /api/v1/rules response
    #[arg(long = "rules-file", env = "RULES_FILE")]
    rules_file: Option<PathBuf>,
    /// Number of returned series from which aggregating with sum() is suggested
    #[arg(long = "sum-threshold", env = "SUM_HINT_THRESHOLD", default_value_t = SUM_HINT_THRESHOLD_COUNT)]
    sum_threshold: usize,
    /// Range used when a fix wraps the query in rate()
    #[arg(long = "rate-interval", env = "RATE_INTERVAL", default_value = DEFAULT_RATE_INTERVAL)]
    rate_interval: String,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();
    let args = Args::parse();
    info!(
        "starting prom-query-hints (bind={}, sum_threshold={}, rate_interval={})",
        args.bind, args.sum_threshold, args.rate_interval
    );
    let config = AppConfig {
        metadata_file: args.metadata_file.clone(),
        rules_file: args.rules_file.clone(),
        sum_threshold: args.sum_threshold,
        rate_interval: args.rate_interval.clone(),
    };
    info!("bootstrapping application state");
    let state = AppState::bootstrap(config).await?;
    let app = router(state);

    info!("binding TCP listener on {}", args.bind);
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind listener: {err}")))?;
    info!("prom-query-hints listening on {}", args.bind);
    axum::serve(listener, app)
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;
    Ok(())
}

fn init_logging() {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env().init();
    } else {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Warn)
            .filter_module("prom_query_hints", LevelFilter::Info)
            .init();
    }
}
