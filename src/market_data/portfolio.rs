use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aptos::cli::AptosCli;
use crate::aptos::types::AccountAddress;
use crate::aptos::client::ChainClient;
use crate::error::Result;
use crate::market_data::models::PortfolioEntry;
use crate::market_data::parser::{parse_portfolio_entries, parse_view_portfolio};
use crate::trading::payload::MarketModules;

/// Reads a wallet's holdings from the `user_portfolio` module.
pub struct PortfolioReader {
    client: Arc<dyn ChainClient>,
    cli: AptosCli,
    modules: MarketModules,
}

impl PortfolioReader {
    pub fn new(client: Arc<dyn ChainClient>, cli: AptosCli, modules: MarketModules) -> Self {
        Self { client, cli, modules }
    }

    async fn view_portfolio(&self, wallet: &str) -> Result<Vec<PortfolioEntry>> {
        let function = self
            .modules
            .function_id(&self.modules.portfolio_module, "get_portfolio");

        let values = if self.cli.is_enabled() {
            self.cli.move_view(&function, &[format!("address:{}", wallet)]).await?
        } else {
            self.client.view(&function, &[], &[json!(wallet)]).await?
        };
        parse_view_portfolio(&values)
    }

    /// Tries the `get_portfolio` view first, then the raw `Portfolio`
    /// resource. An account without the resource holds nothing.
    pub async fn fetch(&self, wallet: &AccountAddress) -> Result<Vec<PortfolioEntry>> {
        let wallet = wallet.to_hex();
        let wallet = wallet.as_str();
        match self.view_portfolio(wallet).await {
            Ok(entries) => return Ok(entries),
            Err(e) => warn!("get_portfolio view failed for {}: {}, reading resources", wallet, e),
        }

        let portfolio_type = self
            .modules
            .resource_type(&self.modules.portfolio_module, "Portfolio");
        let resources = self.client.account_resources(wallet).await?;

        match resources.iter().find(|r| r.resource_type == portfolio_type) {
            Some(resource) => parse_portfolio_entries(&resource.data["coins"]),
            None => {
                debug!("{} has no {}", wallet, portfolio_type);
                Ok(Vec::new())
            }
        }
    }
}
