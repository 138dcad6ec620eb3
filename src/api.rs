use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::aptos::types::{AccountAddress, PendingTransaction};
use crate::error::{RelayError, Result};
use crate::market_data::portfolio::PortfolioReader;
use crate::market_data::store::MarketStore;
use crate::trading::decoder::{decode_pending_transaction, decode_with_signature};
use crate::trading::flow::{BuyOrder, SellOrder, TradeService};
use crate::trading::payload::MarketModules;
use crate::trading::units::parse_amount;

/// Envelope shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

pub struct AppState {
    pub modules: MarketModules,
    pub store: MarketStore,
    pub trades: TradeService,
    pub portfolio: PortfolioReader,
}

#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    #[serde(rename = "coinIndex", alias = "stockIndex")]
    pub index: Option<Value>,
    #[serde(rename = "amountInUSD")]
    pub amount_in_usd: Option<Value>,
    #[serde(rename = "walletAddress")]
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SellRequest {
    #[serde(rename = "coinSymbol", alias = "stockSymbol")]
    pub symbol: Option<String>,
    #[serde(rename = "amountToSell")]
    pub amount_to_sell: Option<Value>,
    #[serde(rename = "recipientAddress")]
    pub recipient_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// `expiration_timestamp_secs` of the prepared transaction.
    #[serde(rename = "expirationTimestampSecs")]
    pub expiration_timestamp_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PortfolioQuery {
    #[serde(rename = "walletAddress")]
    pub wallet_address: Option<String>,
}

fn invalid(message: &str) -> RelayError {
    RelayError::InvalidInput(message.to_string())
}

fn validate_address(raw: Option<&str>) -> Result<AccountAddress> {
    match raw {
        Some(address) if address.starts_with("0x") => address
            .parse()
            .map_err(|_| invalid("Invalid wallet address format")),
        _ => Err(invalid("Invalid wallet address format")),
    }
}

fn validate_amount(raw: Option<&Value>) -> Result<rust_decimal::Decimal> {
    let amount = raw
        .and_then(|v| parse_amount(v).ok())
        .ok_or_else(|| invalid("Invalid amount"))?;
    if amount <= rust_decimal::Decimal::ZERO {
        return Err(invalid("Invalid amount"));
    }
    Ok(amount)
}

fn validate_index(raw: Option<&Value>, stock: bool) -> Result<usize> {
    let message = if stock { "Invalid stock index" } else { "Invalid coin index" };
    match raw {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(message))
}

fn buy_order(request: &BuyRequest, stock: bool) -> Result<BuyOrder> {
    let wallet = validate_address(request.wallet_address.as_deref())?;
    let amount_usd = validate_amount(request.amount_in_usd.as_ref())?;
    let index = validate_index(request.index.as_ref(), stock)?;
    Ok(BuyOrder {
        index,
        amount_usd,
        wallet,
    })
}

fn sell_order(request: &SellRequest) -> Result<SellOrder> {
    let recipient = validate_address(request.recipient_address.as_deref())?;
    let symbol = request
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("Invalid symbol"))?;
    let amount = validate_amount(request.amount_to_sell.as_ref())?;
    Ok(SellOrder {
        symbol: symbol.to_string(),
        amount,
        recipient,
    })
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

async fn market_data(state: web::Data<AppState>) -> Result<HttpResponse> {
    let snapshot = state.store.current_or_refresh().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(snapshot)))
}

/// Upstream failures answer 200 with an empty list so the dashboard renders
/// an empty portfolio instead of an error.
async fn portfolio(state: web::Data<AppState>, query: web::Query<PortfolioQuery>) -> Result<HttpResponse> {
    let wallet = query
        .wallet_address
        .as_deref()
        .filter(|w| !w.is_empty())
        .ok_or_else(|| invalid("Wallet address is required"))?;
    let address = validate_address(Some(wallet))?;

    let entries = match state.portfolio.fetch(&address).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Portfolio lookup for {} failed, answering empty: {}", wallet, e);
            Vec::new()
        }
    };
    Ok(HttpResponse::Ok().json(ApiResponse::ok(entries)))
}

async fn buy(state: web::Data<AppState>, body: web::Json<BuyRequest>) -> Result<HttpResponse> {
    let order = buy_order(&body, false)?;
    let prepared = state.trades.prepare_buy(order, false).await?;
    info!("Prepared buy {} for {}", prepared.trade_id, prepared.decoded.sender);
    Ok(HttpResponse::Ok().json(ApiResponse::ok(prepared)))
}

async fn buy_stock(state: web::Data<AppState>, body: web::Json<BuyRequest>) -> Result<HttpResponse> {
    let order = buy_order(&body, true)?;
    let prepared = state.trades.prepare_buy(order, true).await?;
    info!("Prepared stock buy {} for {}", prepared.trade_id, prepared.decoded.sender);
    Ok(HttpResponse::Ok().json(ApiResponse::ok(prepared)))
}

async fn sell(state: web::Data<AppState>, body: web::Json<SellRequest>) -> Result<HttpResponse> {
    let order = sell_order(&body)?;
    let prepared = state.trades.prepare_sell(order, false).await?;
    info!("Prepared sell {} for {}", prepared.trade_id, prepared.decoded.sender);
    Ok(HttpResponse::Ok().json(ApiResponse::ok(prepared)))
}

async fn sell_stock(state: web::Data<AppState>, body: web::Json<SellRequest>) -> Result<HttpResponse> {
    let order = sell_order(&body)?;
    let prepared = state.trades.prepare_sell(order, true).await?;
    info!("Prepared stock sell {} for {}", prepared.trade_id, prepared.decoded.sender);
    Ok(HttpResponse::Ok().json(ApiResponse::ok(prepared)))
}

/// Decodes a pending transaction relayed by the dashboard. Calls into our
/// market modules decode against their signature.
async fn decode_transaction(state: web::Data<AppState>, body: web::Json<Value>) -> Result<HttpResponse> {
    let pending = PendingTransaction::from_json(body.into_inner())?;
    let decoded = match state.modules.action_for(&pending.payload.value) {
        Some(action) => decode_with_signature(&pending, action.signature())?,
        None => decode_pending_transaction(&pending)?,
    };
    Ok(HttpResponse::Ok().json(ApiResponse::ok(decoded)))
}

async fn transaction_status(
    state: web::Data<AppState>,
    hash: web::Path<String>,
    query: web::Query<StatusQuery>,
) -> Result<HttpResponse> {
    let status = state
        .trades
        .submission_status(&hash, query.expiration_timestamp_secs)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(status)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default().error_handler(|err, _req| RelayError::InvalidInput(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default().error_handler(|err, _req| RelayError::InvalidInput(err.to_string()).into()),
    )
    .route("/health", web::get().to(health))
    .route("/market-data", web::get().to(market_data))
    .route("/portfolio", web::get().to(portfolio))
    .route("/buy", web::post().to(buy))
    .route("/buy-stock", web::post().to(buy_stock))
    .route("/sell", web::post().to(sell))
    .route("/sell-stock", web::post().to(sell_stock))
    .route("/decode-transaction", web::post().to(decode_transaction))
    .route("/transactions/{hash}", web::get().to(transaction_status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_validation_matches_dashboard_messages() {
        for bad in [None, Some("123"), Some("0"), Some("0xnothex")] {
            assert_eq!(
                validate_address(bad).unwrap_err().to_string(),
                "Invalid wallet address format"
            );
        }
        assert!(validate_address(Some("0xabc")).is_ok());
    }

    #[test]
    fn amounts_must_be_positive_numbers() {
        assert!(validate_amount(Some(&json!("20"))).is_ok());
        assert!(validate_amount(Some(&json!(0))).is_err());
        assert!(validate_amount(Some(&json!("-1"))).is_err());
        assert!(validate_amount(Some(&json!("abc"))).is_err());
        assert!(validate_amount(None).is_err());
    }

    #[test]
    fn indices_accept_numbers_and_numeric_strings() {
        assert_eq!(validate_index(Some(&json!(2)), false).unwrap(), 2);
        assert_eq!(validate_index(Some(&json!("1")), false).unwrap(), 1);
        assert_eq!(
            validate_index(Some(&json!(-1)), true).unwrap_err().to_string(),
            "Invalid stock index"
        );
    }

    #[test]
    fn stock_requests_use_stock_field_names() {
        let request: BuyRequest = serde_json::from_value(json!({
            "stockIndex": 0,
            "amountInUSD": "100",
            "walletAddress": "0xabc"
        }))
        .unwrap();
        let order = buy_order(&request, true).unwrap();
        assert_eq!(order.amount_usd, rust_decimal::Decimal::from(100));

        let request: SellRequest = serde_json::from_value(json!({
            "stockSymbol": "AAPL",
            "amountToSell": 1,
            "recipientAddress": "0xabc"
        }))
        .unwrap();
        assert_eq!(sell_order(&request).unwrap().symbol, "AAPL");
    }

    mod endpoints {
        use super::*;
        use crate::aptos::cli::AptosCli;
        use crate::aptos::client::ChainClient;
        use crate::aptos::mock::MockChainClient;
        use crate::market_data::feed::OnChainMarket;
        use crate::trading::payload::MarketModules;
        use crate::trading::requester::TransactionRequester;
        use crate::utils::config::CliConfig;
        use actix_web::{test, App};
        use std::sync::Arc;
        use std::time::Duration;

        fn modules() -> MarketModules {
            MarketModules {
                address: "0x42".parse().unwrap(),
                coin_module: "mock_coins".to_string(),
                stock_module: "mock_stocks".to_string(),
                portfolio_module: "user_portfolio".to_string(),
            }
        }

        fn state(client: MockChainClient) -> web::Data<AppState> {
            let client: Arc<dyn ChainClient> = Arc::new(client);
            let store = MarketStore::new(Arc::new(OnChainMarket::new(client.clone(), modules())));
            let requester = TransactionRequester::new(client.clone(), Duration::from_secs(1));
            let cli = AptosCli::new(CliConfig {
                enabled: false,
                binary: "aptos".to_string(),
                profile: "default".to_string(),
                timeout_secs: 1,
            });
            web::Data::new(AppState {
                modules: modules(),
                store: store.clone(),
                trades: TradeService::new(modules(), requester, store, client.clone()),
                portfolio: PortfolioReader::new(client, cli, modules()),
            })
        }

        fn seeded() -> MockChainClient {
            MockChainClient::seeded(&modules().address, "mock_coins", "mock_stocks")
        }

        #[actix_web::test]
        async fn buy_with_bad_wallet_is_rejected() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::post()
                .uri("/buy")
                .set_json(json!({"coinIndex": 0, "amountInUSD": "20", "walletAddress": "123"}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body, json!({"success": false, "error": "Invalid wallet address format"}));
        }

        #[actix_web::test]
        async fn buy_returns_wallet_payload() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::post()
                .uri("/buy")
                .set_json(json!({"coinIndex": 2, "amountInUSD": 1.3, "walletAddress": "0xabc"}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 200);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["success"], true);
            assert_eq!(body["data"]["payload"]["type"], "entry_function_payload");
            assert_eq!(body["data"]["payload"]["arguments"], json!(["2", "2000000"]));
            assert_eq!(body["data"]["metadata"]["symbol"], "ADA");
        }

        #[actix_web::test]
        async fn raw_transaction_decodes_back_to_arguments() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::post()
                .uri("/sell-stock")
                .set_json(json!({"stockSymbol": "AMZN", "amountToSell": "2", "recipientAddress": "0xabc"}))
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            let raw = body["data"]["rawTransaction"].clone();

            let req = test::TestRequest::post()
                .uri("/decode-transaction")
                .set_json(raw)
                .to_request();
            let decoded: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(
                decoded["data"]["arguments"],
                json!([
                    {"type": "bytes", "value": "0x414d5a4e"},
                    {"type": "integer", "value": "2000000"}
                ])
            );
        }

        #[actix_web::test]
        async fn malformed_transaction_is_a_bad_request() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::post()
                .uri("/decode-transaction")
                .set_json(json!({"sender": "nope"}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);
        }

        #[actix_web::test]
        async fn portfolio_masks_node_failures() {
            let app = test::init_service(
                App::new()
                    .app_data(state(MockChainClient::unreachable()))
                    .configure(configure),
            )
            .await;
            let req = test::TestRequest::get()
                .uri("/portfolio?walletAddress=0xabc")
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 200);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body, json!({"success": true, "data": []}));
        }

        #[actix_web::test]
        async fn portfolio_requires_wallet() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::get().uri("/portfolio").to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "Wallet address is required");
        }

        #[actix_web::test]
        async fn market_data_reads_seeded_prices() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::get().uri("/market-data").to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;

            assert_eq!(body["data"]["cryptos"][0]["symbol"], "BTC");
            assert_eq!(body["data"]["cryptos"][0]["onChainPrice"], "52150750000");
            assert_eq!(body["data"]["stocks"].as_array().unwrap().len(), 3);
        }

        #[actix_web::test]
        async fn portfolio_rejects_addresses_that_are_not_hex() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::get()
                .uri("/portfolio?walletAddress=0xabc%2Fresources%3Fx%3D1")
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "Invalid wallet address format");
        }

        #[actix_web::test]
        async fn buy_stock_reports_missing_stock_market_as_upstream_failure() {
            let coin_market = modules().resource_type("mock_coins", "Market");
            let client = MockChainClient::new(4).with_resource(
                "0x42",
                &coin_market,
                json!({"coins": [{"symbol": "0x425443", "current_value": "1000000", "last_update": "0"}]}),
            );
            let app = test::init_service(App::new().app_data(state(client)).configure(configure)).await;

            let req = test::TestRequest::get().uri("/market-data").to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 502);

            let req = test::TestRequest::post()
                .uri("/buy-stock")
                .set_json(json!({"stockIndex": 0, "amountInUSD": "20", "walletAddress": "0xabc"}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 502);
        }

        #[actix_web::test]
        async fn foreign_module_is_decoded_by_width() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::post()
                .uri("/sell")
                .set_json(json!({"coinSymbol": "BTC", "amountToSell": "1", "recipientAddress": "0xabc"}))
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            let mut raw = body["data"]["rawTransaction"].clone();
            raw["payload"]["value"]["module_name"]["name"]["value"] = json!("other_market");

            let req = test::TestRequest::post()
                .uri("/decode-transaction")
                .set_json(raw)
                .to_request();
            let decoded: Value = test::call_and_read_body_json(&app, req).await;
            // vector<u8> "BTC" carries its length prefix when read without a signature
            assert_eq!(decoded["data"]["arguments"][0], json!({"type": "integer", "value": "1129595395"}));
        }

        #[actix_web::test]
        async fn expired_unknown_hash_is_abandoned() {
            let app = test::init_service(App::new().app_data(state(seeded())).configure(configure)).await;
            let req = test::TestRequest::get()
                .uri("/transactions/0xbeef?expirationTimestampSecs=1")
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["data"]["stage"], "abandoned");
            assert_eq!(body["data"]["committed"], false);

            let req = test::TestRequest::get().uri("/transactions/0xbeef").to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["data"]["stage"], "transaction_decoded");
        }

        #[actix_web::test]
        async fn market_data_fails_without_a_node() {
            let app = test::init_service(
                App::new()
                    .app_data(state(MockChainClient::unreachable()))
                    .configure(configure),
            )
            .await;
            let req = test::TestRequest::get().uri("/market-data").to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 502);
        }
    }
}
