//! Catalog of subscribable streams and stream identifier mapping

use crate::errors::{ExchangeError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle intervals the exchange publishes
pub const CANDLE_INTERVALS: [&str; 6] = ["1m", "5m", "15m", "1h", "4h", "1d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    Ticker,
    Trades,
    Candles1m,
    Candles5m,
    Candles15m,
    Candles1h,
    Candles4h,
    Candles1d,
    Depth,
    DepthSnapshot,
    UserOrders,
    UserTrades,
    UserPositions,
    UserBalances,
}

impl Channel {
    pub const ALL: [Channel; 14] = [
        Channel::Ticker,
        Channel::Trades,
        Channel::Candles1m,
        Channel::Candles5m,
        Channel::Candles15m,
        Channel::Candles1h,
        Channel::Candles4h,
        Channel::Candles1d,
        Channel::Depth,
        Channel::DepthSnapshot,
        Channel::UserOrders,
        Channel::UserTrades,
        Channel::UserPositions,
        Channel::UserBalances,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            Channel::Ticker => "ticker",
            Channel::Trades => "trades",
            Channel::Candles1m => "candles1m",
            Channel::Candles5m => "candles5m",
            Channel::Candles15m => "candles15m",
            Channel::Candles1h => "candles1h",
            Channel::Candles4h => "candles4h",
            Channel::Candles1d => "candles1d",
            Channel::Depth => "depth",
            Channel::DepthSnapshot => "depthSnapshot",
            Channel::UserOrders => "userOrders",
            Channel::UserTrades => "userTrades",
            Channel::UserPositions => "userPositions",
            Channel::UserBalances => "userBalances",
        }
    }

    /// Unknown names are not an error; the dispatcher treats them as noise
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.wire_name() == name)
    }

    /// True for the four account streams
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            Channel::UserOrders | Channel::UserTrades | Channel::UserPositions | Channel::UserBalances
        )
    }

    pub fn is_candle(&self) -> bool {
        self.candle_interval().is_some()
    }

    pub fn candle_interval(&self) -> Option<&'static str> {
        match self {
            Channel::Candles1m => Some("1m"),
            Channel::Candles5m => Some("5m"),
            Channel::Candles15m => Some("15m"),
            Channel::Candles1h => Some("1h"),
            Channel::Candles4h => Some("4h"),
            Channel::Candles1d => Some("1d"),
            _ => None,
        }
    }

    /// Candle channel for an interval such as `"15m"`
    pub fn candles(interval: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.candle_interval() == Some(interval))
            .ok_or_else(|| {
                ExchangeError::UnsupportedChannel(format!(
                    "candle interval {interval} (supported: {})",
                    CANDLE_INTERVALS.join(", ")
                ))
            })
    }

    /// `<wire_name>.<SYMBOL>` with `-` rewritten to `_`; bare wire name without a symbol
    pub fn stream_id(&self, symbol: &str) -> String {
        if symbol.is_empty() {
            self.wire_name().to_string()
        } else {
            format!("{}.{}", self.wire_name(), symbol.replace('-', "_"))
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Channel {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_wire_name(s).ok_or_else(|| ExchangeError::UnsupportedChannel(s.to_string()))
    }
}

/// Split a stream identifier into channel and hyphenated symbol
///
/// `None` when the channel part is not in the catalog.
pub fn parse_stream_id(stream: &str) -> Option<(Channel, String)> {
    let (name, symbol) = match stream.split_once('.') {
        Some((name, symbol)) => (name, symbol.replace('_', "-")),
        None => (stream, String::new()),
    };
    Channel::from_wire_name(name).map(|channel| (channel, symbol))
}

/// Registry key for one (channel, symbol) binding
///
/// An empty symbol is the channel-only key that catches every symbol of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub channel: Channel,
    pub symbol: String,
}

impl SubscriptionKey {
    /// Symbols are stored in hyphen form regardless of how they were given
    pub fn new(channel: Channel, symbol: impl AsRef<str>) -> Self {
        Self {
            channel,
            symbol: symbol.as_ref().replace('_', "-"),
        }
    }

    pub fn channel_only(channel: Channel) -> Self {
        Self {
            channel,
            symbol: String::new(),
        }
    }

    pub fn is_channel_only(&self) -> bool {
        self.symbol.is_empty()
    }

    pub fn stream_id(&self) -> String {
        self.channel.stream_id(&self.symbol)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stream_id())
    }
}
