//! Authenticated account streams
//!
//! Needs `BACKPACK_API_KEY` and `BACKPACK_API_SECRET` (Base64 Ed25519 seed),
//! read from the environment or a `.env` file.

use backpack_client::prelude::*;
use std::time::Duration;
use tracing::{error, info};

#[monoio::main(enable_timer = true)]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let config = BackpackConfig::default().with_env_credentials()?;
    let mut client = BackpackClient::new(config)?.with_reconnect_config(ReconnectConfig {
        max_attempts: 5,
        ..ReconnectConfig::default()
    });

    client.on_failure(|e| error!("❌ Stream failed: {}", e));
    client.connect().await?;

    let timer = PerfTimer::start("stream_authenticate");
    client.authenticate().await?;
    info!("🔐 Authenticated in {}μs", timer.finish());

    client
        .subscribe_orders(|order| {
            info!(
                "📋 Order {} {} {:?} {}/{} {:?}",
                order.id, order.symbol, order.side, order.executed_quantity, order.quantity, order.status
            );
        })
        .await?;

    client
        .subscribe_balances(|balance| {
            info!("💰 {} free={} locked={}", balance.asset, balance.free, balance.locked);
        })
        .await?;

    client
        .subscribe_user_trades(|trade| info!("✅ Fill {} {} @ {}", trade.symbol, trade.quantity, trade.price))
        .await?;

    for _ in 0..120 {
        monoio::time::sleep(Duration::from_secs(1)).await;
        if !client.is_connected() {
            client.reconnect().await?;
        }
    }

    client.disconnect().await;
    Ok(())
}
