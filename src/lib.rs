pub mod config;
pub mod domain;
pub mod error;
pub mod execution;
pub mod jupiter;
pub mod monitoring;
pub mod ports;
pub mod quote;
pub mod risk;
pub mod rpc;
pub mod session;
pub mod store;
pub mod tokens;
pub mod units;
pub mod wallet;

#[cfg(test)]
mod testing;
