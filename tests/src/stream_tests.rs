//! Streaming engine behaviour driven through the client facade
//!
//! No socket is opened: the session state is moved to Connected by hand and
//! inbound frames are fed straight to the dispatcher. Outbound frames are read
//! back from the session queue.

use backpack_client::prelude::*;
use backpack_client::stream::{parse_stream_id, DispatchOutcome, OutboundQueue};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use proptest::prelude::*;
use rstest::*;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn connected(config: BackpackConfig) -> BackpackClient {
    let client = BackpackClient::new(config).unwrap();
    let state = client.session().session_state();
    state.begin_connect();
    state.mark_connected();
    client
}

fn sent_frames(client: &BackpackClient) -> Vec<Value> {
    client
        .session()
        .queue()
        .receiver()
        .try_iter()
        .map(|frame| serde_json::from_str(&frame).unwrap())
        .collect()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&StreamEvent) -> Result<()> + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    (count, move |_: &StreamEvent| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

// ============================================================================
// STREAM IDENTIFIERS
// ============================================================================

mod stream_ids {
    use super::*;

    #[rstest]
    #[case(Channel::Ticker, "SOL-USDC", "ticker.SOL_USDC")]
    #[case(Channel::Depth, "BTC_USDC", "depth.BTC_USDC")]
    #[case(Channel::Candles4h, "ETH-USDC", "candles4h.ETH_USDC")]
    #[case(Channel::UserOrders, "", "userOrders")]
    fn test_stream_id(#[case] channel: Channel, #[case] symbol: &str, #[case] expected: &str) {
        assert_eq!(SubscriptionKey::new(channel, symbol).stream_id(), expected);
    }

    #[test]
    fn test_unknown_channel_is_not_parsed() {
        assert_eq!(parse_stream_id("bookTicker.SOL_USDC"), None);
    }

    proptest! {
        #[test]
        fn test_stream_id_round_trip(index in 0..Channel::ALL.len(), symbol in "[A-Z]{2,5}-[A-Z]{3,4}") {
            let channel = Channel::ALL[index];
            let parsed = parse_stream_id(&channel.stream_id(&symbol));
            prop_assert_eq!(parsed, Some((channel, symbol)));
        }

        #[test]
        fn test_wire_name_round_trip(index in 0..Channel::ALL.len()) {
            let channel = Channel::ALL[index];
            prop_assert_eq!(channel.wire_name().parse::<Channel>().unwrap(), channel);
        }
    }
}

// ============================================================================
// SUBSCRIPTION LIFECYCLE
// ============================================================================

mod subscriptions {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_sol_usdc_ticker_end_to_end() {
        let client = connected(BackpackConfig::default());
        let prices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&prices);
        client
            .subscribe_ticker("SOL-USDC", move |ticker| sink.lock().unwrap().push(ticker.last_price))
            .await
            .unwrap();

        let frames = sent_frames(&client);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["method"], "SUBSCRIBE");
        assert_eq!(frames[0]["params"][0], "ticker.SOL_USDC");

        let tick = r#"{"stream":"ticker.SOL_USDC","data":{"symbol":"SOL_USDC","lastPrice":"142.35","bestBid":"142.30","bestAsk":"142.40","volume24h":"52000","priceChange24h":"-1.2"}}"#;
        assert_eq!(client.dispatcher().dispatch(tick), DispatchOutcome::Delivered);
        assert_eq!(prices.lock().unwrap().len(), 1);
        assert_eq!(prices.lock().unwrap()[0].to_string(), "142.35");
    }

    #[monoio::test(enable_timer = true)]
    async fn test_subscribe_then_unsubscribe_leaves_nothing() {
        let client = connected(BackpackConfig::default());
        let (count, handler) = counter();

        client.subscribe(Channel::Trades, "SOL-USDC", handler).await.unwrap();
        client.unsubscribe(Channel::Trades, "SOL-USDC").unwrap();

        assert!(client.subscriptions().is_empty());
        let outcome = client
            .dispatcher()
            .dispatch(r#"{"stream":"trades.SOL_USDC","data":{"p":"1"}}"#);
        assert_eq!(outcome, DispatchOutcome::Unmatched);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let methods: Vec<Value> = sent_frames(&client).into_iter().map(|f| f["method"].clone()).collect();
        assert_eq!(methods, ["SUBSCRIBE", "UNSUBSCRIBE"]);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_duplicate_frames_delivered_twice() {
        let client = connected(BackpackConfig::default());
        let (count, handler) = counter();
        client.subscribe(Channel::Depth, "SOL-USDC", handler).await.unwrap();

        let frame = r#"{"stream":"depth.SOL_USDC","data":{"b":[],"a":[]}}"#;
        client.dispatcher().dispatch(frame);
        client.dispatcher().dispatch(frame);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_channel_only_subscription_catches_every_symbol() {
        let client = connected(BackpackConfig::default());
        let symbols = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&symbols);
        client
            .subscribe(Channel::Trades, "", move |event| {
                sink.lock().unwrap().push(event.symbol.clone());
                Ok(())
            })
            .await
            .unwrap();

        client.dispatcher().dispatch(r#"{"stream":"trades.SOL_USDC","data":{}}"#);
        client.dispatcher().dispatch(r#"{"stream":"trades.BTC_USDC","data":{}}"#);
        assert_eq!(*symbols.lock().unwrap(), ["SOL-USDC", "BTC-USDC"]);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_failing_handler_does_not_stop_dispatch() {
        let client = connected(BackpackConfig::default());
        let (count, handler) = counter();
        client
            .subscribe(Channel::Ticker, "SOL-USDC", |_| {
                Err(ExchangeError::HandlerError("boom".to_string()))
            })
            .await
            .unwrap();
        client.subscribe(Channel::Ticker, "BTC-USDC", handler).await.unwrap();

        let bad = client.dispatcher().dispatch(r#"{"stream":"ticker.SOL_USDC","data":{}}"#);
        let good = client.dispatcher().dispatch(r#"{"stream":"ticker.BTC_USDC","data":{}}"#);
        assert_eq!(bad, DispatchOutcome::Delivered);
        assert_eq!(good, DispatchOutcome::Delivered);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_raw_observer_sees_unmatched_frames() {
        let client = connected(BackpackConfig::default());
        let streams = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&streams);
        client.on_raw_message(move |stream, _| sink.lock().unwrap().push(stream.to_string()));

        let outcome = client.dispatcher().dispatch(r#"{"stream":"depth.ETH_USDC","data":{}}"#);
        assert_eq!(outcome, DispatchOutcome::Unmatched);
        assert_eq!(*streams.lock().unwrap(), ["depth.ETH_USDC"]);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_unsupported_candle_interval() {
        let client = connected(BackpackConfig::default());
        let result = client.subscribe_candles("SOL-USDC", "7m", |_| {}).await;
        assert!(matches!(result, Err(ExchangeError::UnsupportedChannel(_))));
        assert!(sent_frames(&client).is_empty());
    }
}

// ============================================================================
// PRIVATE CHANNELS AND AUTHENTICATION
// ============================================================================

mod private_channels {
    use super::*;

    fn credentialed() -> BackpackConfig {
        BackpackConfig::default()
            .with_credentials("test-key", STANDARD.encode([3u8; 32]))
            .with_auth_timeout(2000, 5)
    }

    #[monoio::test(enable_timer = true)]
    async fn test_private_subscribe_without_credentials() {
        let client = connected(BackpackConfig::default());
        let result = client.subscribe_balances(|_| {}).await;

        assert!(matches!(result, Err(ExchangeError::MissingCredentials(_))));
        assert!(client.subscriptions().is_empty());
        assert!(sent_frames(&client).is_empty());
    }

    #[monoio::test(enable_timer = true)]
    async fn test_authenticate_while_disconnected_returns_immediately() {
        let client = BackpackClient::new(credentialed()).unwrap();
        let started = Instant::now();

        let result = client.authenticate().await;
        assert!(matches!(result, Err(ExchangeError::NotConnected(_))));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_private_subscribe_authenticates_first() {
        let client = connected(credentialed());
        let dispatcher = client.dispatcher().clone();
        monoio::spawn(async move {
            monoio::time::sleep(Duration::from_millis(20)).await;
            dispatcher.dispatch(r#"{"type":"auth","success":true}"#);
        });

        let fills = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fills);
        client
            .subscribe_orders(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert!(client.is_authenticated());

        let frames = sent_frames(&client);
        assert_eq!(frames[0]["method"], "AUTH");
        assert_eq!(frames[1]["method"], "SUBSCRIBE");
        assert_eq!(frames[1]["params"][0], "userOrders");

        let update = r#"{"stream":"userOrders","data":{"orderId":"11","symbol":"SOL_USDC","side":"BUY","type":"LIMIT","price":"140","quantity":"2","executedQty":"0.5","status":"PARTIALLY_FILLED"}}"#;
        assert_eq!(client.dispatcher().dispatch(update), DispatchOutcome::Delivered);
        assert_eq!(fills.load(Ordering::SeqCst), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_server_error_during_auth_is_rejection() {
        let client = connected(credentialed());
        let dispatcher = client.dispatcher().clone();
        monoio::spawn(async move {
            monoio::time::sleep(Duration::from_millis(20)).await;
            dispatcher.dispatch(r#"{"error":{"code":4001,"message":"Invalid signature"}}"#);
        });

        let result = client.subscribe_positions(|_| {}).await;
        assert!(matches!(result, Err(ExchangeError::AuthenticationFailed(_))));
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.subscriptions().is_empty());
    }
}

// ============================================================================
// OUTBOUND QUEUE
// ============================================================================

mod outbound_queue {
    use super::*;

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[case(32)]
    fn test_capacity_plus_one_is_rejected(#[case] capacity: usize) {
        let queue = OutboundQueue::new(capacity);
        for i in 0..capacity {
            queue.enqueue(format!("frame-{i}")).unwrap();
        }
        assert!(matches!(queue.enqueue("overflow"), Err(ExchangeError::QueueFull(n)) if n == capacity));
        assert_eq!(queue.len(), capacity);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_client_send_respects_bound() {
        let client = connected(BackpackConfig::default().with_queue_capacity(2));
        client.ping().unwrap();
        client.send(r#"{"method":"PING"}"#).unwrap();
        assert!(matches!(client.ping(), Err(ExchangeError::QueueFull(2))));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_send_before_connect() {
        let client = BackpackClient::new(BackpackConfig::default()).unwrap();
        assert!(matches!(client.send("{}"), Err(ExchangeError::NotConnected(_))));
    }
}
