//! Async trait seams for one-shot requests
//!
//! Every endpoint is a default method over [`SignedTransport`]; an
//! implementation only provides the two transport calls. Futures are not
//! `Send` because the monoio transport is thread-local.

use crate::errors::{ExchangeError, Result};
use crate::http::HttpMethod;
use crate::stream::Channel;
use crate::types::*;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

/// Query parameters in the order they are sent
pub type Query = Vec<(&'static str, String)>;

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
}

/// Optional time range and limit shared by the history endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryRange {
    pub limit: Option<u32>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl HistoryRange {
    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn between(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    fn append_to(&self, query: &mut Query) {
        if let Some(limit) = self.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(start) = self.start_time.filter(|t| *t > 0) {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = self.end_time.filter(|t| *t > 0) {
            query.push(("endTime", end.to_string()));
        }
    }
}

/// Identifies an existing order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Id(String),
    ClientId(String),
}

impl OrderRef {
    fn append_to(&self, query: &mut Query) {
        match self {
            OrderRef::Id(id) => query.push(("orderId", id.clone())),
            OrderRef::ClientId(id) => query.push(("clientOrderId", id.clone())),
        }
    }
}

#[async_trait(?Send)]
pub trait SignedTransport {
    /// Unauthenticated request
    async fn send_request(&self, method: HttpMethod, path: &str, query: &Query, body: Option<&str>) -> Result<Value>;

    /// Request carrying the four `X-*` authentication headers
    async fn send_signed_request(&self, method: HttpMethod, path: &str, query: &Query, body: Option<&str>) -> Result<Value>;
}

/// Public market data
#[async_trait(?Send)]
pub trait MarketData: SignedTransport {
    /// Server time in milliseconds
    async fn server_time(&self) -> Result<i64> {
        let value = self.send_request(HttpMethod::Get, "/api/v1/time", &Query::new(), None).await?;
        value
            .get("serverTime")
            .and_then(Value::as_i64)
            .or_else(|| value.as_i64())
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("no serverTime in {value}")))
    }

    async fn exchange_info(&self) -> Result<ExchangeInfo> {
        decode(self.send_request(HttpMethod::Get, "/api/v1/exchangeInfo", &Query::new(), None).await?)
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        let query = vec![("symbol", symbol.to_string())];
        decode(self.send_request(HttpMethod::Get, "/api/v1/ticker", &query, None).await?)
    }

    /// Every ticker keyed by symbol
    async fn tickers(&self) -> Result<BTreeMap<String, Ticker>> {
        let tickers: Vec<Ticker> = decode(self.send_request(HttpMethod::Get, "/api/v1/tickers", &Query::new(), None).await?)?;
        Ok(tickers.into_iter().map(|ticker| (ticker.symbol.clone(), ticker)).collect())
    }

    async fn order_book(&self, symbol: &str, limit: u32) -> Result<OrderBook> {
        let query = vec![("symbol", symbol.to_string()), ("limit", limit.to_string())];
        decode(self.send_request(HttpMethod::Get, "/api/v1/depth", &query, None).await?)
    }

    async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Vec<Trade>> {
        let query = vec![("symbol", symbol.to_string()), ("limit", limit.to_string())];
        decode(self.send_request(HttpMethod::Get, "/api/v1/trades", &query, None).await?)
    }

    /// `interval` must be a candle channel
    async fn candles(&self, symbol: &str, interval: Channel, range: HistoryRange) -> Result<Vec<Candle>> {
        let interval = interval
            .candle_interval()
            .ok_or_else(|| ExchangeError::UnsupportedChannel(format!("{interval} is not a candle channel")))?;
        let mut query = vec![("symbol", symbol.to_string()), ("interval", interval.to_string())];
        range.append_to(&mut query);
        decode(self.send_request(HttpMethod::Get, "/api/v1/klines", &query, None).await?)
    }
}

/// Order entry and order queries
#[async_trait(?Send)]
pub trait Trading: SignedTransport {
    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        request.validate()?;
        let body = request.to_json()?;
        decode(self.send_signed_request(HttpMethod::Post, "/api/v1/order", &Query::new(), Some(&body)).await?)
    }

    /// Validated by the exchange but never placed
    async fn test_order(&self, request: &OrderRequest) -> Result<()> {
        request.validate()?;
        let body = request.to_json()?;
        self.send_signed_request(HttpMethod::Post, "/api/v1/order/test", &Query::new(), Some(&body))
            .await?;
        Ok(())
    }

    async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> Result<()> {
        let mut query = vec![("symbol", symbol.to_string())];
        order.append_to(&mut query);
        self.send_signed_request(HttpMethod::Delete, "/api/v1/order", &query, None).await?;
        Ok(())
    }

    /// Number of orders canceled; all symbols when `symbol` is `None`
    async fn cancel_all_orders(&self, symbol: Option<&str>) -> Result<u64> {
        let query = symbol.map(|s| vec![("symbol", s.to_string())]).unwrap_or_default();
        let value = self.send_signed_request(HttpMethod::Delete, "/api/v1/openOrders", &query, None).await?;
        Ok(value.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn get_order(&self, symbol: &str, order: &OrderRef) -> Result<Order> {
        let mut query = vec![("symbol", symbol.to_string())];
        order.append_to(&mut query);
        decode(self.send_signed_request(HttpMethod::Get, "/api/v1/order", &query, None).await?)
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let query = symbol.map(|s| vec![("symbol", s.to_string())]).unwrap_or_default();
        decode(self.send_signed_request(HttpMethod::Get, "/api/v1/openOrders", &query, None).await?)
    }

    async fn all_orders(&self, symbol: &str, range: HistoryRange) -> Result<Vec<Order>> {
        let mut query = vec![("symbol", symbol.to_string())];
        range.append_to(&mut query);
        decode(self.send_signed_request(HttpMethod::Get, "/api/v1/allOrders", &query, None).await?)
    }
}

/// Account state and fills
#[async_trait(?Send)]
pub trait AccountData: SignedTransport {
    async fn account(&self) -> Result<Account> {
        decode(self.send_signed_request(HttpMethod::Get, "/api/v1/account", &Query::new(), None).await?)
    }

    async fn balances(&self) -> Result<Vec<Balance>> {
        decode(self.send_signed_request(HttpMethod::Get, "/api/v1/balances", &Query::new(), None).await?)
    }

    async fn account_trades(&self, symbol: &str, range: HistoryRange) -> Result<Vec<Trade>> {
        let mut query = vec![("symbol", symbol.to_string())];
        range.append_to(&mut query);
        decode(self.send_signed_request(HttpMethod::Get, "/api/v1/myTrades", &query, None).await?)
    }

    async fn historical_trades(&self, symbol: &str, limit: u32, from_id: Option<&str>) -> Result<Vec<Trade>> {
        let mut query = vec![("symbol", symbol.to_string()), ("limit", limit.to_string())];
        if let Some(from_id) = from_id.filter(|id| !id.is_empty()) {
            query.push(("fromId", from_id.to_string()));
        }
        decode(self.send_signed_request(HttpMethod::Get, "/api/v1/historicalTrades", &query, None).await?)
    }
}
