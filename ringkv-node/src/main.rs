use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ringkv_node::config::NodeConfig;
use ringkv_node::server::Server;
use ringkv_node::{console, maintenance};

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs for machine ingestion (RINGKV_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("RINGKV_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("ringkv_node=info".parse()?)
        .add_directive("ringkv_proto=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match NodeConfig::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };
    let bootstrap = config.bootstrap()?;

    let (server, results) = Server::bind(config).await?;
    let state = server.state();
    let accept = tokio::spawn(server.run());
    let upkeep = maintenance::spawn(Arc::clone(&state));

    if let Some((ip, port)) = bootstrap {
        state.join(&ip, port).await;
    }

    console::run(Arc::clone(&state), results).await?;

    let _ = accept.await;
    let _ = upkeep.await;
    println!("node stopped, port released");
    Ok(())
}
