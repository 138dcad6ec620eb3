use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Result;
use crate::market_data::feed::PriceSource;
use crate::market_data::models::MarketSnapshot;

/// Last-write-wins market snapshot shared by the request handlers.
#[derive(Clone)]
pub struct MarketStore {
    source: Arc<dyn PriceSource>,
    latest: Arc<RwLock<MarketSnapshot>>,
}

impl MarketStore {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            latest: Arc::new(RwLock::new(MarketSnapshot::empty())),
        }
    }

    pub async fn snapshot(&self) -> MarketSnapshot {
        self.latest.read().await.clone()
    }

    /// Fetches from the source and replaces the snapshot. On failure the old
    /// snapshot stays, flagged as cached.
    pub async fn refresh(&self) -> Result<MarketSnapshot> {
        match self.source.fetch_snapshot().await {
            Ok(snapshot) => {
                info!(
                    "Market refreshed from {}: {} cryptos, {} stocks",
                    self.source.name(),
                    snapshot.cryptos.len(),
                    snapshot.stocks.len()
                );
                *self.latest.write().await = snapshot.clone();
                Ok(snapshot)
            }
            Err(e) => {
                self.latest.write().await.is_cached = true;
                Err(e)
            }
        }
    }

    /// Serves the stored snapshot, fetching first if nothing was ever stored.
    pub async fn current_or_refresh(&self) -> Result<MarketSnapshot> {
        let snapshot = self.snapshot().await;
        if snapshot.is_populated() {
            return Ok(snapshot);
        }
        self.refresh().await
    }

    /// Refreshes every `interval`, never more often than once a second.
    pub fn start_background_updates(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let period = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                if let Err(e) = store.refresh().await {
                    error!("Failed to refresh market data: {}", e);
                }
            }
        })
    }
}
