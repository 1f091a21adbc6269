use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::{SOL_MINT, USDC_MINT_DEVNET, USDC_MINT_MAINNET};
use crate::ports::TokenDecimals;
use crate::units::DEFAULT_DECIMALS;

pub const CACHE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    /// Decimals were not confirmed by any source; UIs must flag amounts derived from them.
    #[serde(default)]
    pub assumed: bool,
}

impl TokenMetadata {
    pub fn unknown(mint: &str) -> Self {
        let prefix: String = mint.chars().take(4).collect();
        Self {
            mint: mint.to_string(),
            symbol: format!("{}...", prefix.to_uppercase()),
            name: "Unknown Token".to_string(),
            decimals: DEFAULT_DECIMALS,
            logo_uri: None,
            assumed: true,
        }
    }

    fn known(mint: &str, symbol: &str, name: &str, decimals: u8) -> Self {
        Self {
            mint: mint.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            logo_uri: None,
            assumed: false,
        }
    }
}

pub fn known_tokens() -> Vec<TokenMetadata> {
    vec![
        TokenMetadata::known(SOL_MINT, "SOL", "Solana", 9),
        TokenMetadata::known(USDC_MINT_MAINNET, "USDC", "USD Coin", 6),
        TokenMetadata::known(USDC_MINT_DEVNET, "USDC", "USD Coin (Devnet)", 6),
    ]
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` means the source answered and does not know the token.
    async fn lookup(&self, mint: &str) -> Result<Option<TokenMetadata>>;
}

pub trait MetadataStorage: Send + Sync {
    fn load(&self) -> Result<Option<CacheSnapshot>>;
    fn save(&self, snapshot: &CacheSnapshot) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub saved_at: DateTime<Utc>,
    pub tokens: Vec<TokenMetadata>,
}

pub struct FileMetadataStorage {
    path: PathBuf,
}

impl FileMetadataStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl MetadataStorage for FileMetadataStorage {
    fn load(&self) -> Result<Option<CacheSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let snapshot = serde_json::from_str(&raw)?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let raw = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Token lookup against the aggregator's token API (`GET {base}/{mint}`).
pub struct JupiterTokenSource {
    base_url: String,
    http: Client,
}

impl JupiterTokenSource {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[derive(Deserialize)]
struct TokenApiEntry {
    address: Option<String>,
    symbol: Option<String>,
    name: Option<String>,
    decimals: Option<u8>,
    #[serde(rename = "logoURI")]
    logo_uri: Option<String>,
}

#[async_trait]
impl MetadataSource for JupiterTokenSource {
    async fn lookup(&self, mint: &str) -> Result<Option<TokenMetadata>> {
        let url = format!("{}/{}", self.base_url, mint);
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entry: TokenApiEntry = resp.error_for_status()?.json().await?;

        let fallback = TokenMetadata::unknown(mint);
        Ok(Some(TokenMetadata {
            mint: entry.address.unwrap_or_else(|| mint.to_string()),
            symbol: entry.symbol.unwrap_or(fallback.symbol),
            name: entry.name.unwrap_or(fallback.name),
            assumed: entry.decimals.is_none(),
            decimals: entry.decimals.unwrap_or(DEFAULT_DECIMALS),
            logo_uri: entry.logo_uri,
        }))
    }
}

/// Session-scoped metadata cache: opened at session start from storage,
/// written back on every insert and on `flush`.
pub struct TokenMetadataCache {
    entries: RwLock<HashMap<String, TokenMetadata>>,
    source: Option<Box<dyn MetadataSource>>,
    storage: Option<Box<dyn MetadataStorage>>,
}

impl TokenMetadataCache {
    pub fn open(source: Option<Box<dyn MetadataSource>>, storage: Option<Box<dyn MetadataStorage>>) -> Self {
        let mut entries: HashMap<String, TokenMetadata> =
            known_tokens().into_iter().map(|t| (t.mint.clone(), t)).collect();

        if let Some(store) = storage.as_deref() {
            match store.load() {
                Ok(Some(snapshot)) if !is_expired(snapshot.saved_at, Utc::now()) => {
                    debug!(tokens = snapshot.tokens.len(), "tokens.cache.loaded");
                    for t in snapshot.tokens {
                        entries.entry(t.mint.clone()).or_insert(t);
                    }
                }
                Ok(Some(_)) => debug!("tokens.cache.expired"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "tokens.cache.load_failed"),
            }
        }

        Self { entries: RwLock::new(entries), source, storage }
    }

    pub async fn get_cached(&self, mint: &str) -> Option<TokenMetadata> {
        self.entries.read().await.get(mint).cloned()
    }

    pub async fn insert(&self, metadata: TokenMetadata) {
        self.entries.write().await.insert(metadata.mint.clone(), metadata);
        self.flush().await;
    }

    /// Cache, then source, then the assumed 9-decimal placeholder. Source
    /// errors are not cached so a later call can still resolve the token.
    pub async fn resolve(&self, mint: &str) -> TokenMetadata {
        if let Some(hit) = self.get_cached(mint).await {
            return hit;
        }
        let Some(source) = self.source.as_deref() else {
            return TokenMetadata::unknown(mint);
        };

        match source.lookup(mint).await {
            Ok(Some(found)) => {
                self.insert(found.clone()).await;
                found
            }
            Ok(None) => {
                let placeholder = TokenMetadata::unknown(mint);
                self.insert(placeholder.clone()).await;
                placeholder
            }
            Err(e) => {
                warn!(mint, error = %e, "tokens.lookup_failed");
                TokenMetadata::unknown(mint)
            }
        }
    }

    pub async fn flush(&self) {
        let Some(store) = self.storage.as_deref() else {
            return;
        };
        let snapshot = CacheSnapshot {
            saved_at: Utc::now(),
            tokens: self.entries.read().await.values().cloned().collect(),
        };
        if let Err(e) = store.save(&snapshot) {
            warn!(error = %e, "tokens.cache.save_failed");
        }
    }
}

#[async_trait]
impl TokenDecimals for TokenMetadataCache {
    async fn resolve_decimals(&self, mint: &str) -> u8 {
        if mint.is_empty() {
            return DEFAULT_DECIMALS;
        }
        self.resolve(mint).await.decimals
    }
}

fn is_expired(saved_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(CACHE_EXPIRY) {
        Ok(expiry) => now.signed_duration_since(saved_at) >= expiry,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        answer: Option<TokenMetadata>,
        fail: bool,
    }

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn lookup(&self, _mint: &str) -> Result<Option<TokenMetadata>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("token api down");
            }
            Ok(self.answer.clone())
        }
    }

    #[derive(Default)]
    struct SharedStorage(Arc<Mutex<Option<CacheSnapshot>>>);

    impl MetadataStorage for SharedStorage {
        fn load(&self) -> Result<Option<CacheSnapshot>> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn save(&self, snapshot: &CacheSnapshot) -> Result<()> {
            *self.0.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }

    fn bonk() -> TokenMetadata {
        TokenMetadata::known("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "Bonk", "Bonk", 5)
    }

    #[tokio::test]
    async fn known_tokens_resolve_without_a_source() {
        let cache = TokenMetadataCache::open(None, None);
        assert_eq!(cache.resolve_decimals(USDC_MINT_MAINNET).await, 6);
        assert_eq!(cache.resolve_decimals(SOL_MINT).await, 9);
        let unknown = cache.resolve("Zzzz1111").await;
        assert_eq!(unknown.decimals, DEFAULT_DECIMALS);
        assert!(unknown.assumed);
        assert_eq!(unknown.symbol, "ZZZZ...");
    }

    #[tokio::test]
    async fn lookups_are_cached_and_persisted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(Mutex::new(None));
        let source = CountingSource { calls: calls.clone(), answer: Some(bonk()), fail: false };
        let cache = TokenMetadataCache::open(Some(Box::new(source)), Some(Box::new(SharedStorage(shared.clone()))));

        assert_eq!(cache.resolve_decimals(&bonk().mint).await, 5);
        assert_eq!(cache.resolve_decimals(&bonk().mint).await, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a new session over the same storage starts warm
        let reopened = TokenMetadataCache::open(None, Some(Box::new(SharedStorage(shared))));
        assert_eq!(reopened.get_cached(&bonk().mint).await, Some(bonk()));
    }

    #[tokio::test]
    async fn source_errors_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource { calls: calls.clone(), answer: None, fail: true };
        let cache = TokenMetadataCache::open(Some(Box::new(source)), None);

        assert_eq!(cache.resolve_decimals("Mint1").await, DEFAULT_DECIMALS);
        assert_eq!(cache.resolve_decimals("Mint1").await, DEFAULT_DECIMALS);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_snapshots_are_ignored() {
        let stale = CacheSnapshot { saved_at: Utc::now() - chrono::Duration::hours(25), tokens: vec![bonk()] };
        let storage = SharedStorage(Arc::new(Mutex::new(Some(stale))));
        let cache = TokenMetadataCache::open(None, Some(Box::new(storage)));
        assert_eq!(cache.get_cached(&bonk().mint).await, None);
    }

    #[test]
    fn file_storage_round_trips_a_snapshot() {
        let path = std::env::temp_dir().join(format!("swap_terminal_tokens_{}.json", std::process::id()));
        let storage = FileMetadataStorage::new(&path);
        assert!(storage.load().unwrap().is_none());

        let snapshot = CacheSnapshot { saved_at: Utc::now(), tokens: vec![bonk()] };
        storage.save(&snapshot).unwrap();
        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(loaded.tokens, vec![bonk()]);
        let _ = fs::remove_file(path);
    }
}
