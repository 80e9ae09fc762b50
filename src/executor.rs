use crate::broker::Broker;
use crate::config::ExecutionConfig;
use crate::error::BrokerError;
use crate::orders::{ClosedTrade, Fill, OpenPosition, SizedOrder};
use log::{error, info, warn};
use tokio::time::{Duration, sleep};

/// Sends orders and closes with bounded retries on transient broker failures.
///
/// Every attempt for an order carries the same `client_order_id`, so a broker
/// that already accepted an earlier attempt answers with the original fill.
#[derive(Debug, Clone)]
pub struct OrderExecutor {
    max_retries: u32,
    retry_delay: Duration,
}

impl OrderExecutor {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub async fn submit<B: Broker>(&self, broker: &mut B, order: &SizedOrder) -> Result<Fill, BrokerError> {
        let label = format!("Order {}", order.client_order_id);
        let fill = self.with_retries(broker, &label, |b| b.submit(order)).await?;
        info!(
            "{} filled: {:?} {} @ {:.5} (trade {})",
            label, fill.direction, fill.volume, fill.price, fill.trade_id
        );
        Ok(fill)
    }

    pub async fn close<B: Broker>(&self, broker: &mut B, position: &OpenPosition) -> Result<ClosedTrade, BrokerError> {
        let label = format!("Close of trade {}", position.trade_id);
        let trade = self
            .with_retries(broker, &label, |b| b.close_position(position))
            .await?;
        info!("{} done @ {:.5}, P&L {:.2}", label, trade.exit_price, trade.pnl);
        Ok(trade)
    }

    async fn with_retries<B, T, F>(&self, broker: &mut B, label: &str, mut attempt_fn: F) -> Result<T, BrokerError>
    where
        B: Broker,
        F: FnMut(&mut B) -> Result<T, BrokerError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match attempt_fn(broker) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt <= self.max_retries => {
                    warn!("{} attempt {} failed: {}. Retrying in {:?}", label, attempt, e, self.retry_delay);
                    sleep(self.retry_delay).await;
                    if matches!(e, BrokerError::ConnectionLost { .. }) {
                        if let Err(reconnect_err) = broker.reconnect() {
                            warn!("Reconnect failed: {}", reconnect_err);
                        }
                    }
                }
                Err(e) => {
                    error!("{} failed after {} attempt(s): {}", label, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
