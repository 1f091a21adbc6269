use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine as _;
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use tracing::info;

use crate::error::WalletError;
use crate::jupiter::SwapTransaction;
use crate::ports::{SignedTransaction, Wallet};

pub type Approval = Box<dyn Fn(&SwapTransaction) -> bool + Send + Sync>;

/// Local signer backed by a keypair file. An optional approval hook stands in
/// for the wallet prompt; declining it yields `WalletError::UserRejected`.
pub struct KeypairWallet {
    keypair: Keypair,
    connected: AtomicBool,
    approval: Option<Approval>,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair, connected: AtomicBool::new(true), approval: None }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let keypair = read_keypair_file(path).map_err(|e| anyhow!("failed to read keypair {path}: {e}"))?;
        Ok(Self::new(keypair))
    }

    pub fn with_approval(mut self, approval: Approval) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn pubkey_string(&self) -> String {
        self.keypair.pubkey().to_string()
    }
}

#[async_trait]
impl Wallet for KeypairWallet {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn public_address(&self) -> Option<String> {
        self.is_connected().then(|| self.pubkey_string())
    }

    async fn sign(&self, tx: &SwapTransaction) -> Result<SignedTransaction, WalletError> {
        if !self.is_connected() {
            return Err(WalletError::NotConnected);
        }
        if let Some(approve) = &self.approval {
            if !approve(tx) {
                return Err(WalletError::UserRejected);
            }
        }

        let tx_bytes = base64::engine::general_purpose::STANDARD
            .decode(&tx.payload)
            .map_err(|e| WalletError::Signing(format!("payload is not base64: {e}")))?;
        let unsigned: VersionedTransaction = bincode::deserialize(&tx_bytes)
            .map_err(|e| WalletError::Signing(format!("payload is not a transaction: {e}")))?;

        // Aggregator provides the message; we add our signature.
        let signed = VersionedTransaction::try_new(unsigned.message, &[&self.keypair])
            .map_err(|e| WalletError::Signing(e.to_string()))?;
        let signature = signed
            .signatures
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| WalletError::Signing("transaction has no signatures".into()))?;
        let bytes = bincode::serialize(&signed).map_err(|e| WalletError::Signing(e.to_string()))?;

        Ok(SignedTransaction { signature, bytes })
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        info!("wallet.disconnected");
    }
}

/// Stand-in when no keypair is configured: quoting works, execution reports
/// `WalletNotConnected`.
pub struct NoWallet;

#[async_trait]
impl Wallet for NoWallet {
    fn is_connected(&self) -> bool {
        false
    }

    fn public_address(&self) -> Option<String> {
        None
    }

    async fn sign(&self, _tx: &SwapTransaction) -> Result<SignedTransaction, WalletError> {
        Err(WalletError::NotConnected)
    }

    fn disconnect(&self) {}
}
