use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::TradeRecord;
use crate::ports::TradeStore;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
const TRADES_TABLE: &str = "trades";

/// Trade history kept in a hosted PostgREST table (`/rest/v1/trades`).
pub struct SupabaseTradeStore {
    http: reqwest::Client,
    table_url: String,
}

impl SupabaseTradeStore {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(anon_key).context("invalid anon key")?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {anon_key}")).context("invalid anon key")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;
        let table_url = format!("{}/rest/v1/{TRADES_TABLE}", base_url.trim_end_matches('/'));
        Ok(Self { http, table_url })
    }
}

#[async_trait]
impl TradeStore for SupabaseTradeStore {
    async fn create_trade_record(&self, record: &TradeRecord) -> Result<()> {
        let resp = self
            .http
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("trade insert failed: {status}: {body}");
        }
        info!(wallet = %record.wallet_address, tx_sig = ?record.transaction_signature, "store.trade.created");
        Ok(())
    }

    async fn list_trade_records(&self, wallet_address: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let resp = self
            .http
            .get(&self.table_url)
            .query(&[
                ("select", "*".to_string()),
                ("wallet_address", format!("eq.{wallet_address}")),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("trade history failed: {status}: {body}"));
        }
        let records: Vec<TradeRecord> = resp.json().await?;
        debug!(wallet = %wallet_address, count = records.len(), "store.trade.listed");
        Ok(records)
    }
}

/// Process-local store; used when no backend is configured.
#[derive(Default)]
pub struct MemoryTradeStore {
    records: RwLock<Vec<TradeRecord>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn create_trade_record(&self, record: &TradeRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(sig) = &record.transaction_signature {
            if records.iter().any(|r| r.transaction_signature.as_ref() == Some(sig)) {
                bail!("duplicate trade record for {sig}");
            }
        }
        records.push(record.clone());
        Ok(())
    }

    async fn list_trade_records(&self, wallet_address: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let records = self.records.read().await;
        let mut mine: Vec<TradeRecord> =
            records.iter().filter(|r| r.wallet_address == wallet_address).cloned().collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        mine.truncate(limit);
        Ok(mine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TradeDirection, SOL_MINT, USDC_MINT_MAINNET};
    use chrono::{TimeZone, Utc};

    fn record(wallet: &str, sig: &str, minute: u32) -> TradeRecord {
        TradeRecord {
            wallet_address: wallet.into(),
            direction: TradeDirection::Buy,
            input_mint: SOL_MINT.into(),
            output_mint: USDC_MINT_MAINNET.into(),
            input_amount: 1.0,
            output_amount_estimate: 150.0,
            transaction_signature: Some(sig.into()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn history_is_newest_first_and_scoped_to_wallet() {
        let store = MemoryTradeStore::new();
        store.create_trade_record(&record("alice", "s1", 1)).await.unwrap();
        store.create_trade_record(&record("bob", "s2", 2)).await.unwrap();
        store.create_trade_record(&record("alice", "s3", 3)).await.unwrap();
        store.create_trade_record(&record("alice", "s4", 0)).await.unwrap();

        let got = store.list_trade_records("alice", 2).await.unwrap();
        let sigs: Vec<_> = got.iter().filter_map(|r| r.transaction_signature.as_deref()).collect();
        assert_eq!(sigs, ["s3", "s1"]);
    }

    #[tokio::test]
    async fn duplicate_signature_is_rejected() {
        let store = MemoryTradeStore::new();
        store.create_trade_record(&record("alice", "s1", 1)).await.unwrap();
        assert!(store.create_trade_record(&record("alice", "s1", 2)).await.is_err());
        assert_eq!(store.list_trade_records("alice", 10).await.unwrap().len(), 1);
    }
}
