//! CYCLEARB: Cyclic Arbitrage Discovery Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the subgraph, quoter and router collaborators, and runs the
//! fetch → discover → evaluate → execute loop until Ctrl+C.

use anyhow::{Context, Result};
use ethers::types::Address;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info, warn};

use cyclearb::config::{self, AppConfig};
use cyclearb::engine::orchestrator::Orchestrator;
use cyclearb::platforms::dry_run::DryRunExecution;
use cyclearb::platforms::subgraph::SubgraphClient;
use cyclearb::platforms::uniswap::{http_provider, UniswapQuoter, UniswapRouter};
use cyclearb::platforms::{ExecutionService, MarketDataProvider, QuotingOracle};

const BANNER: &str = r#"
   ______              __         ___         __
  / ____/_  __ _____  / /__      /   |  _____/ /_
 / /   / / / // ___/ / // _ \   / /| | / ___/ __ \
/ /___/ /_/ // /__  / //  __/  / ___ |/ /  / /_/ /
\____/\__, / \___/ /_/ \___/  /_/  |_/_/  /_.___/
     /____/

  Cyclic arbitrage discovery engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        base_asset = ?cfg.discovery.base_asset,
        dry_run = cfg.agent.dry_run,
        chain_id = cfg.rpc.chain_id,
        "CYCLEARB starting up"
    );

    // -- Collaborators ---------------------------------------------------

    let api_key = cfg
        .data_source
        .api_key_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    if api_key.is_none() {
        warn!("No subgraph API key configured, using anonymous access");
    }
    let market: Arc<dyn MarketDataProvider> = Arc::new(SubgraphClient::new(
        cfg.data_source.subgraph_url.clone(),
        api_key,
        cfg.data_source.page_size,
        cfg.data_source.pages,
    )?);

    let rpc_url = AppConfig::resolve_env(&cfg.rpc.url_env)?;
    let oracle: Arc<dyn QuotingOracle> = Arc::new(UniswapQuoter::new(
        http_provider(&rpc_url)?,
        cfg.rpc.quoter_address,
    ));

    let private_key = SecretString::new(AppConfig::resolve_env(&cfg.rpc.private_key_env)?);
    let router = UniswapRouter::new(
        http_provider(&rpc_url)?,
        &private_key,
        cfg.rpc.chain_id,
        cfg.rpc.router_address,
    )?;

    let recipient = resolve_recipient(&cfg, router.sender())?;

    let execution: Arc<dyn ExecutionService> = if cfg.agent.dry_run {
        info!("Dry-run mode: trades will be logged, not submitted");
        Arc::new(DryRunExecution::new(Arc::new(router)))
    } else {
        Arc::new(router)
    };

    let mut orchestrator = Orchestrator::from_config(&cfg, recipient, market, oracle, execution)?;

    // -- Main loop -------------------------------------------------------

    info!("Entering main loop. Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    match orchestrator.run(shutdown).await {
        Ok(()) => {
            info!("CYCLEARB shut down cleanly.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "CYCLEARB stopped");
            Err(e.into())
        }
    }
}

/// Swap output goes to the configured recipient, or back to the signer.
fn resolve_recipient(cfg: &AppConfig, signer: Address) -> Result<Address> {
    match std::env::var(&cfg.execution.recipient_env) {
        Ok(raw) => raw
            .parse::<Address>()
            .with_context(|| format!("Invalid recipient address in {}", cfg.execution.recipient_env)),
        Err(_) => {
            warn!(signer = ?signer, "No recipient configured, using signer address");
            Ok(signer)
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cyclearb=info"));

    let json_logging = std::env::var("CYCLEARB_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
