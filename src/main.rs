use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use memagent::agent::Agent;
use memagent::bridge::{connect_pool, BridgeConnector};
use memagent::cli;
use memagent::config::Config;
use memagent::llm::HttpLlmClient;
use memagent::planner::RulePlanner;
use memagent::reasoning::ReasoningEngine;
use memagent::synthesizer::ReportSynthesizer;
use memagent::tool::{engine_registry, ToolExecutor};

#[derive(Parser)]
#[command(name = "memagent")]
#[command(about = "AI-driven memory analysis agent", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Execute one request and exit.
    #[arg(short, long)]
    request: Option<String>,

    /// Run every request in this file and print a JSON report array.
    #[arg(long)]
    batch: Option<PathBuf>,

    /// Write batch results to this file instead of stdout.
    #[arg(long, requires = "batch")]
    output: Option<PathBuf>,

    /// Allow tools that mutate the target process.
    #[arg(long)]
    allow_destructive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if args.allow_destructive {
        config.executor.allow_destructive = true;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone())),
        )
        .init();

    info!(transport = %config.bridge.transport, "starting memagent");

    let connector = BridgeConnector::new(config.bridge_transport(), config.bridge.max_retries);
    let pool = connect_pool(connector, config.pool_config()).await;

    let registry = engine_registry();
    let executor = ToolExecutor::new(
        Arc::new(registry.clone()),
        pool.clone(),
        config.executor_config(),
    );

    let llm = if config.llm.enabled {
        let mut builder = HttpLlmClient::builder()
            .base_url(config.llm.base_url.clone())
            .model(config.llm.model.clone())
            .max_tokens(config.llm.max_tokens)
            .temperature(config.llm.temperature)
            .timeout(std::time::Duration::from_secs(config.llm.timeout_secs));
        if let Some(key) = &config.llm.api_key {
            builder = builder.api_key(key.clone());
        }
        Some(builder.build()?)
    } else {
        None
    };

    let agent = Arc::new(
        Agent::new(
            Arc::new(RulePlanner::new(registry)),
            Arc::new(ReportSynthesizer),
            ReasoningEngine::new(llm),
            executor,
        )
        .with_callback(Arc::new(cli::print_event)),
    );

    let outcome = if let Some(request) = &args.request {
        let report = agent.execute(request).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    } else if let Some(path) = &args.batch {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read batch file {}", path.display()))?;
        cli::run_batch(agent.clone(), &contents, args.output.as_deref()).await
    } else {
        cli::run_repl(agent.clone()).await
    };

    pool.close().await;
    outcome
}
