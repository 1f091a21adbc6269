//! Seams to everything the swap pipeline does not own: the aggregator, the
//! user's wallet, chain RPC, trade persistence and token metadata.

use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::TradeRecord;
use crate::error::{QuoteError, SwapBuildError, WalletError};
use crate::jupiter::{QuoteParams, QuoteResult, SwapTransaction};

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, params: &QuoteParams) -> Result<QuoteResult, QuoteError>;
}

#[async_trait]
pub trait SwapBuilder: Send + Sync {
    async fn build_swap_transaction(
        &self,
        quote: &QuoteResult,
        wallet_address: &str,
    ) -> Result<SwapTransaction, SwapBuildError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// First signature of the signed transaction; known before broadcast.
    pub signature: String,
    /// Wire bytes ready for `sendTransaction`.
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    fn is_connected(&self) -> bool;
    fn public_address(&self) -> Option<String>;
    /// Fails with `WalletError::UserRejected` when the holder declines.
    async fn sign(&self, tx: &SwapTransaction) -> Result<SignedTransaction, WalletError>;
    fn disconnect(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOptions {
    pub skip_preflight: bool,
    pub max_retries: usize,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self { skip_preflight: true, max_retries: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl FromStr for Commitment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(anyhow!("unknown commitment level: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    /// Landed on-chain but the transaction itself errored.
    Failed(String),
    TimedOut,
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn broadcast(&self, tx: &SignedTransaction, opts: BroadcastOptions) -> anyhow::Result<String>;

    async fn await_confirmation(
        &self,
        signature: &str,
        level: Commitment,
        timeout: Duration,
    ) -> anyhow::Result<ConfirmationOutcome>;
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn create_trade_record(&self, record: &TradeRecord) -> anyhow::Result<()>;

    /// Newest first.
    async fn list_trade_records(&self, wallet_address: &str, limit: usize) -> anyhow::Result<Vec<TradeRecord>>;
}

#[async_trait]
pub trait TokenDecimals: Send + Sync {
    /// Never fails; unknown tokens resolve to the 9-decimal native default.
    async fn resolve_decimals(&self, mint: &str) -> u8;
}
