use std::process::ExitCode;

use strand_config::load_config;
use strand_node::logger::init_logging;
use strand_node::Node;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::var("STRAND_CONFIG_FILE_PATH").ok();
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log);

    let mut node = match Node::new(config) {
        Ok(node) => node,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = node.start().await {
        error!("startup failed: {err}");
        return ExitCode::FAILURE;
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("wait for shutdown signal: {err}");
    }
    info!("shutting down");
    node.close().await;
    ExitCode::SUCCESS
}
