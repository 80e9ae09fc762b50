//! Broker seam. Everything the trading loop needs from a venue goes through
//! [`Broker`]; the concrete protocol lives behind an implementation.

use crate::error::BrokerError;
use crate::market_data::{PriceBar, TimeFrame};
use crate::orders::{ClosedTrade, Fill, OpenPosition, Quote, SizedOrder};
use chrono::NaiveDate;

pub trait Broker {
    /// Most recent `count` bars for the instrument, oldest first. The last bar
    /// may still be forming.
    fn get_bars(&mut self, timeframe: TimeFrame, count: usize) -> Result<Vec<PriceBar>, BrokerError>;

    fn account_equity(&mut self) -> Result<f64, BrokerError>;

    fn open_position(&mut self) -> Result<Option<OpenPosition>, BrokerError>;

    fn quote(&mut self) -> Result<Quote, BrokerError>;

    /// Submit an order. Submitting the same `client_order_id` twice must not
    /// open a second position.
    fn submit(&mut self, order: &SizedOrder) -> Result<Fill, BrokerError>;

    fn close_position(&mut self, position: &OpenPosition) -> Result<ClosedTrade, BrokerError>;

    /// Trades closed by the venue since the previous call (stop loss, take
    /// profit). Each trade is returned once.
    fn closed_trades(&mut self) -> Result<Vec<ClosedTrade>, BrokerError>;

    /// Every trade the venue closed on `date` (UTC), however it was closed.
    fn closed_trades_on(&mut self, date: NaiveDate) -> Result<Vec<ClosedTrade>, BrokerError>;

    fn reconnect(&mut self) -> Result<(), BrokerError>;
}
