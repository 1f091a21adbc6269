//! In-process fakes for the collaborator ports, shared by unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use crate::domain::{TradeRecord, SOL_MINT, USDC_MINT_MAINNET};
use crate::error::{QuoteError, SwapBuildError, WalletError};
use crate::jupiter::{QuoteParams, QuoteResult, RouteStep, SwapTransaction};
use crate::ports::{
    BroadcastOptions, ChainRpc, Commitment, ConfirmationOutcome, QuoteSource, SignedTransaction, SwapBuilder,
    TokenDecimals, TradeStore, Wallet,
};

pub const WALLET: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
pub const SIGNATURE: &str = "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";

pub type Events = Arc<Mutex<Vec<&'static str>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn logged(events: &Events) -> Vec<&'static str> {
    events.lock().unwrap().clone()
}

fn push(events: &Events, e: &'static str) {
    events.lock().unwrap().push(e);
}

pub fn sample_quote() -> QuoteResult {
    QuoteResult {
        input_mint: SOL_MINT.into(),
        output_mint: USDC_MINT_MAINNET.into(),
        in_amount: "1500000000".into(),
        out_amount: "225000000".into(),
        price_impact_pct: serde_json::json!("0.12"),
        route_plan: vec![RouteStep {
            label: Some("Orca".into()),
            input_mint: Some(SOL_MINT.into()),
            output_mint: Some(USDC_MINT_MAINNET.into()),
            percent: Some(100.0),
        }],
        slippage_bps: 100,
        fetched_at: Utc::now(),
        approximate: false,
        source: "https://quote.test".into(),
        raw: serde_json::json!({ "inAmount": "1500000000", "outAmount": "225000000" }),
    }
}

pub struct FixedDecimals;

#[async_trait]
impl TokenDecimals for FixedDecimals {
    async fn resolve_decimals(&self, mint: &str) -> u8 {
        if mint == USDC_MINT_MAINNET {
            6
        } else {
            9
        }
    }
}

pub struct EchoQuotes;

#[async_trait]
impl QuoteSource for EchoQuotes {
    async fn fetch_quote(&self, params: &QuoteParams) -> Result<QuoteResult, QuoteError> {
        Ok(QuoteResult {
            input_mint: params.input_mint.clone(),
            output_mint: params.output_mint.clone(),
            in_amount: params.amount.to_string(),
            ..sample_quote()
        })
    }
}

pub struct FakeBuilder {
    pub events: Events,
    pub result: Result<(), SwapBuildError>,
    pub delay: Duration,
}

#[async_trait]
impl SwapBuilder for FakeBuilder {
    async fn build_swap_transaction(
        &self,
        _quote: &QuoteResult,
        _wallet_address: &str,
    ) -> Result<SwapTransaction, SwapBuildError> {
        push(&self.events, "build");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone().map(|_| SwapTransaction {
            payload: "AQAB".into(),
            last_valid_block_height: Some(1),
            prioritization_fee_lamports: Some(5_000),
        })
    }
}

pub struct FakeWallet {
    pub events: Events,
    pub connected: bool,
    pub reject: bool,
    /// When set, `sign` waits for a notification before answering.
    pub gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Wallet for FakeWallet {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn public_address(&self) -> Option<String> {
        self.connected.then(|| WALLET.to_string())
    }

    async fn sign(&self, _tx: &SwapTransaction) -> Result<SignedTransaction, WalletError> {
        push(&self.events, "sign");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.reject {
            return Err(WalletError::UserRejected);
        }
        Ok(SignedTransaction { signature: SIGNATURE.into(), bytes: vec![1, 2, 3] })
    }

    fn disconnect(&self) {}
}

pub struct FakeRpc {
    pub events: Events,
    pub broadcast_ok: bool,
    pub confirmation: ConfirmationOutcome,
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn broadcast(&self, tx: &SignedTransaction, _opts: BroadcastOptions) -> anyhow::Result<String> {
        push(&self.events, "broadcast");
        if !self.broadcast_ok {
            anyhow::bail!("connection reset");
        }
        Ok(tx.signature.clone())
    }

    async fn await_confirmation(
        &self,
        _signature: &str,
        _level: Commitment,
        _timeout: Duration,
    ) -> anyhow::Result<ConfirmationOutcome> {
        push(&self.events, "confirm");
        Ok(self.confirmation.clone())
    }
}

pub struct FakeStore {
    pub events: Events,
    pub fail: bool,
    pub records: Mutex<Vec<TradeRecord>>,
}

#[async_trait]
impl TradeStore for FakeStore {
    async fn create_trade_record(&self, record: &TradeRecord) -> anyhow::Result<()> {
        push(&self.events, "persist");
        if self.fail {
            anyhow::bail!("backend unavailable");
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn list_trade_records(&self, wallet_address: &str, limit: usize) -> anyhow::Result<Vec<TradeRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().rev().filter(|r| r.wallet_address == wallet_address).take(limit).cloned().collect())
    }
}
