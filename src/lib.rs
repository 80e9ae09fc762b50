pub mod broker;
pub mod config;
pub mod error;
pub mod executor;
pub mod filters;
pub mod indicators;
pub mod market_data;
pub mod monitor;
pub mod orders;
pub mod paper;
pub mod risk;
pub mod signals;
pub mod stats;
pub mod trader;
