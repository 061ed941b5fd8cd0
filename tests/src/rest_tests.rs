//! REST endpoint mapping checked against a recording transport

use async_trait::async_trait;
use backpack_client::prelude::*;
use backpack_client::traits::{Query, SignedTransport};
use backpack_client::HttpMethod;
use rstest::*;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
struct Call {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    body: Option<String>,
    signed: bool,
}

/// Records every call and answers with a canned value
struct RecordingTransport {
    calls: RefCell<Vec<Call>>,
    response: Value,
}

impl RecordingTransport {
    fn answering(response: Value) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            response,
        }
    }

    fn last_call(&self) -> Call {
        self.calls.borrow().last().cloned().expect("no call recorded")
    }

    fn record(&self, method: HttpMethod, path: &str, query: &Query, body: Option<&str>, signed: bool) -> Value {
        self.calls.borrow_mut().push(Call {
            method,
            path: path.to_string(),
            query: query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            body: body.map(str::to_string),
            signed,
        });
        self.response.clone()
    }
}

#[async_trait(?Send)]
impl SignedTransport for RecordingTransport {
    async fn send_request(&self, method: HttpMethod, path: &str, query: &Query, body: Option<&str>) -> Result<Value> {
        Ok(self.record(method, path, query, body, false))
    }

    async fn send_signed_request(&self, method: HttpMethod, path: &str, query: &Query, body: Option<&str>) -> Result<Value> {
        Ok(self.record(method, path, query, body, true))
    }
}

impl MarketData for RecordingTransport {}
impl Trading for RecordingTransport {}
impl AccountData for RecordingTransport {}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[fixture]
fn order_json() -> Value {
    json!({
        "orderId": "111",
        "clientOrderId": "abc",
        "symbol": "SOL_USDC",
        "side": "SELL",
        "type": "LIMIT",
        "price": "150.5",
        "quantity": "3",
        "executedQty": "1",
        "status": "NEW"
    })
}

// ============================================================================
// MARKET DATA
// ============================================================================

mod market_data {
    use super::*;

    #[monoio::test]
    async fn test_server_time_accepts_object_or_number() {
        let object = RecordingTransport::answering(json!({"serverTime": 1_700_000_000_000i64}));
        assert_eq!(object.server_time().await.unwrap(), 1_700_000_000_000);

        let bare = RecordingTransport::answering(json!(1_700_000_000_001i64));
        assert_eq!(bare.server_time().await.unwrap(), 1_700_000_000_001);
        assert_eq!(bare.last_call().path, "/api/v1/time");
    }

    #[monoio::test]
    async fn test_order_book_request() {
        let transport = RecordingTransport::answering(json!({
            "symbol": "SOL_USDC",
            "bids": [["141.9", "10"], ["142.0", "4"]],
            "asks": [["142.2", "1"]]
        }));

        let book = transport.order_book("SOL_USDC", 50).await.unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec("142.0"));
        assert_eq!(book.best_ask().unwrap().quantity, dec("1"));

        let call = transport.last_call();
        assert_eq!(call.method, HttpMethod::Get);
        assert_eq!(call.path, "/api/v1/depth");
        assert_eq!(call.query, pairs(&[("symbol", "SOL_USDC"), ("limit", "50")]));
        assert!(!call.signed);
    }

    #[monoio::test]
    async fn test_tickers_keyed_by_symbol() {
        let transport = RecordingTransport::answering(json!([
            {"symbol": "SOL_USDC", "lastPrice": "142", "bestBid": "141.9", "bestAsk": "142.1", "volume24h": "1", "priceChange24h": "0"},
            {"symbol": "BTC_USDC", "lastPrice": "60000", "bestBid": "59999", "bestAsk": "60001", "volume24h": "2", "priceChange24h": "5"}
        ]));

        let tickers = transport.tickers().await.unwrap();
        assert_eq!(tickers.keys().collect::<Vec<_>>(), ["BTC_USDC", "SOL_USDC"]);
        assert_eq!(tickers["BTC_USDC"].spread(), dec("2"));
    }

    #[rstest]
    #[case(HistoryRange::default(), vec![("symbol", "SOL_USDC"), ("interval", "1h")])]
    #[case(HistoryRange::limit(10), vec![("symbol", "SOL_USDC"), ("interval", "1h"), ("limit", "10")])]
    #[case(
        HistoryRange::limit(5).between(100, 200),
        vec![("symbol", "SOL_USDC"), ("interval", "1h"), ("limit", "5"), ("startTime", "100"), ("endTime", "200")]
    )]
    #[monoio::test]
    async fn test_candle_query(#[case] range: HistoryRange, #[case] expected: Vec<(&str, &str)>) {
        let transport = RecordingTransport::answering(json!([]));
        let candles = transport.candles("SOL_USDC", Channel::Candles1h, range).await.unwrap();
        assert!(candles.is_empty());

        let call = transport.last_call();
        assert_eq!(call.path, "/api/v1/klines");
        assert_eq!(call.query, pairs(&expected));
    }

    #[monoio::test]
    async fn test_candles_require_candle_channel() {
        let transport = RecordingTransport::answering(json!([]));
        let result = transport.candles("SOL_USDC", Channel::Depth, HistoryRange::default()).await;
        assert!(matches!(result, Err(ExchangeError::UnsupportedChannel(_))));
        assert!(transport.calls.borrow().is_empty());
    }

    #[monoio::test]
    async fn test_malformed_payload_is_invalid_response() {
        let transport = RecordingTransport::answering(json!({"unexpected": true}));
        let result = transport.ticker("SOL_USDC").await;
        assert!(matches!(result, Err(ExchangeError::InvalidResponse(_))));
    }
}

// ============================================================================
// TRADING
// ============================================================================

mod trading {
    use super::*;

    #[rstest]
    #[monoio::test]
    async fn test_place_order_posts_signed_body(order_json: Value) {
        let transport = RecordingTransport::answering(order_json);
        let request = OrderRequest::limit("SOL_USDC", OrderSide::Sell, dec("3"), dec("150.5"))
            .with_client_order_id("abc")
            .with_time_in_force(TimeInForce::Ioc);

        let order = transport.place_order(&request).await.unwrap();
        assert_eq!(order.id, "111");
        assert_eq!(order.remaining_quantity(), dec("2"));

        let call = transport.last_call();
        assert_eq!(call.method, HttpMethod::Post);
        assert_eq!(call.path, "/api/v1/order");
        assert!(call.signed);

        let body: Value = serde_json::from_str(call.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["symbol"], "SOL_USDC");
        assert_eq!(body["type"], "LIMIT");
        assert_eq!(body["price"], "150.5");
        assert_eq!(body["timeInForce"], "IOC");
        assert_eq!(body["clientOrderId"], "abc");
    }

    #[monoio::test]
    async fn test_invalid_order_never_sent() {
        let transport = RecordingTransport::answering(json!({}));
        let request = OrderRequest::market("SOL_USDC", OrderSide::Buy, Decimal::ZERO);

        assert!(transport.test_order(&request).await.is_err());
        assert!(transport.calls.borrow().is_empty());
    }

    #[rstest]
    #[case(OrderRef::Id("111".to_string()), ("orderId", "111"))]
    #[case(OrderRef::ClientId("abc".to_string()), ("clientOrderId", "abc"))]
    #[monoio::test]
    async fn test_cancel_order_reference(#[case] order: OrderRef, #[case] expected: (&str, &str)) {
        let transport = RecordingTransport::answering(json!({}));
        transport.cancel_order("SOL_USDC", &order).await.unwrap();

        let call = transport.last_call();
        assert_eq!(call.method, HttpMethod::Delete);
        assert_eq!(call.query, pairs(&[("symbol", "SOL_USDC"), expected]));
    }

    #[monoio::test]
    async fn test_cancel_all_reports_count() {
        let transport = RecordingTransport::answering(json!({"count": 4}));
        assert_eq!(transport.cancel_all_orders(None).await.unwrap(), 4);

        let call = transport.last_call();
        assert_eq!(call.path, "/api/v1/openOrders");
        assert!(call.query.is_empty());
    }

    #[rstest]
    #[monoio::test]
    async fn test_open_orders_for_symbol(order_json: Value) {
        let transport = RecordingTransport::answering(json!([order_json]));
        let orders = transport.open_orders(Some("SOL_USDC")).await.unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::New);
        assert_eq!(transport.last_call().query, pairs(&[("symbol", "SOL_USDC")]));
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

mod account {
    use super::*;

    #[monoio::test]
    async fn test_balances_signed_get() {
        let transport = RecordingTransport::answering(json!([
            {"asset": "USDC", "free": "100.5", "locked": "20"}
        ]));

        let balances = transport.balances().await.unwrap();
        assert_eq!(balances[0].total(), dec("120.5"));

        let call = transport.last_call();
        assert_eq!((call.method, call.path.as_str(), call.signed), (HttpMethod::Get, "/api/v1/balances", true));
    }

    #[rstest]
    #[case(None, vec![("symbol", "SOL_USDC"), ("limit", "20")])]
    #[case(Some(""), vec![("symbol", "SOL_USDC"), ("limit", "20")])]
    #[case(Some("900"), vec![("symbol", "SOL_USDC"), ("limit", "20"), ("fromId", "900")])]
    #[monoio::test]
    async fn test_historical_trades_from_id(#[case] from_id: Option<&str>, #[case] expected: Vec<(&str, &str)>) {
        let transport = RecordingTransport::answering(json!([]));
        transport.historical_trades("SOL_USDC", 20, from_id).await.unwrap();
        assert_eq!(transport.last_call().query, pairs(&expected));
    }

    #[monoio::test]
    async fn test_rest_client_without_credentials() {
        let client = BackpackRestClient::new(&BackpackConfig::default()).unwrap();
        assert!(!client.has_credentials());
        assert!(matches!(client.account().await, Err(ExchangeError::MissingCredentials(_))));
    }
}
