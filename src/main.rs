use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use aptos_market_relay::{
    api::{self, AppState},
    aptos::{cli::AptosCli, client::AptosClient, client::ChainClient, mock::MockChainClient},
    market_data::{
        feed::{OnChainMarket, PriceFeed, PriceSource},
        portfolio::PortfolioReader,
        store::MarketStore,
    },
    trading::{payload::MarketModules, TradeService, TransactionRequester},
    utils::config::{Config, PriceSourceKind},
};

#[actix_web::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Aptos market relay...");

    let modules = MarketModules::from_config(&config.aptos)?;
    let request_timeout = Duration::from_secs(config.aptos.request_timeout_secs);

    let client: Arc<dyn ChainClient> = if config.aptos.mock_mode {
        warn!("Mock mode enabled, serving an in-memory chain");
        Arc::new(MockChainClient::seeded(
            &modules.address,
            &modules.coin_module,
            &modules.stock_module,
        ))
    } else {
        Arc::new(AptosClient::new(config.aptos.clone())?)
    };
    info!("Chain client ready ({})", config.aptos.node_url);

    let source: Arc<dyn PriceSource> = match config.market.source {
        PriceSourceKind::OnChain => Arc::new(OnChainMarket::new(client.clone(), modules.clone())),
        PriceSourceKind::PriceFeed => Arc::new(PriceFeed::new(config.market.clone(), request_timeout)?),
    };
    let store = MarketStore::new(source);
    let updates = store.start_background_updates(Duration::from_secs(config.market.refresh_interval_secs));

    let requester = TransactionRequester::new(client.clone(), request_timeout);
    let trades = TradeService::new(modules.clone(), requester, store.clone(), client.clone());
    let portfolio = PortfolioReader::new(client, AptosCli::new(config.cli.clone()), modules.clone());

    let state = web::Data::new(AppState {
        modules,
        store,
        trades,
        portfolio,
    });

    info!("Listening on {}", config.server.bind_address);
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(config.server.bind_address.as_str())?
    .run()
    .await?;

    updates.abort();
    Ok(())
}
