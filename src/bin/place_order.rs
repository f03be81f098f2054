// ============================================================================
// place-order
// ============================================================================
//
// Publishes one order event and prints the broker receipt.
//
//   place-order <customer_id> <amount> [status] [order_id]
//
// A missing order id is generated. Use status FAIL to exercise the retry and
// dead-letter path.
//
// ============================================================================

use anyhow::{bail, Context, Result};
use courier::app;
use courier::telemetry::init_tracing;
use courier::{Config, OrderPlacedEvent, Publisher};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const USAGE: &str = "usage: place-order <customer_id> <amount> [status] [order_id]";

fn parse_args(args: &[String]) -> Result<OrderPlacedEvent> {
    let (customer_id, amount) = match args {
        [customer_id, amount, ..] => (customer_id, amount),
        _ => bail!(USAGE),
    };
    let amount = Decimal::from_str(amount)
        .with_context(|| format!("Invalid amount {:?}", amount))?;
    let status = args.get(2).map(String::as_str).unwrap_or("NEW");
    let order_id = args.get(3).map(String::as_str).unwrap_or("");

    Ok(OrderPlacedEvent::new(order_id, customer_id.as_str(), amount, status))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut event = parse_args(&args)?;

    let config = Config::from_env()?;
    init_tracing(&config.logging)?;

    let broker = app::connect_kafka(&config).await?;
    let publisher = Publisher::new(broker, config.kafka.topic.clone());

    let order_id = event.ensure_order_id().to_string();
    info!(order_id = %order_id, topic = %publisher.topic(), "Publishing order");

    let receipt = publisher
        .publish(&event)
        .await
        .context("Order was not accepted by the broker")?;
    publisher.flush(Duration::from_secs(5)).await?;

    println!("order_id={}", order_id);
    println!(
        "topic={} partition={} offset={} timestamp={}",
        receipt.topic,
        receipt.partition,
        receipt.offset,
        receipt.timestamp.to_rfc3339()
    );
    Ok(())
}
