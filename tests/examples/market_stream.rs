//! Public market data over the streaming connection
//!
//! Subscribes to ticker, trades and depth for one symbol, prints updates for
//! a while and disconnects.
//!
//! ```text
//! cargo run -p backpack-tests --example market_stream -- SOL-USDC 30
//! ```

use backpack_client::prelude::*;
use std::time::Duration;
use tracing::{info, warn};

#[monoio::main(enable_timer = true)]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let mut args = std::env::args().skip(1);
    let symbol = args.next().unwrap_or_else(|| "SOL-USDC".to_string());
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(30);

    info!("🚀 Backpack market stream for {} ({}s)", symbol, seconds);

    let mut client = BackpackClient::new(BackpackConfig::default())?;
    client.on_close(|code, reason| warn!("🔌 Server closed the stream: {} {}", code, reason));
    client.on_failure(|error| warn!("❌ Stream failed: {}", error));

    client.connect().await?;

    client
        .subscribe_ticker(&symbol, |ticker| {
            info!(
                "📈 {} last={} bid={} ask={} spread={}",
                ticker.symbol,
                ticker.last_price,
                ticker.best_bid,
                ticker.best_ask,
                ticker.spread()
            );
        })
        .await?;

    client
        .subscribe_trades(&symbol, |trade| {
            let side = if trade.is_buyer_maker { "SELL" } else { "BUY" };
            info!("💱 {} {} {} @ {}", trade.symbol, side, trade.quantity, trade.price);
        })
        .await?;

    client
        .subscribe(Channel::Depth, &symbol, |event| {
            let bids = event.data.get("b").and_then(|b| b.as_array()).map_or(0, Vec::len);
            let asks = event.data.get("a").and_then(|a| a.as_array()).map_or(0, Vec::len);
            info!("📊 {} depth update: {} bids, {} asks", event.symbol, bids, asks);
            Ok(())
        })
        .await?;

    info!("📡 Subscribed: {:?}", client.subscriptions());

    for _ in 0..seconds {
        monoio::time::sleep(Duration::from_secs(1)).await;
        if !client.is_connected() {
            warn!("🔄 Connection lost, reconnecting");
            client.reconnect().await?;
        }
    }

    client.disconnect().await;
    info!("✅ Done");
    Ok(())
}
