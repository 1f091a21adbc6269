use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::{explorer_url, Network, TradeDirection, TradeRecord};
use crate::error::{ExecutionError, FundsOutcome, WalletError};
use crate::jupiter::QuoteResult;
use crate::ports::{BroadcastOptions, ChainRpc, Commitment, ConfirmationOutcome, SwapBuilder, TokenDecimals, TradeStore, Wallet};
use crate::units::from_base_units;

pub const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Ready,
    BuildingTransaction,
    AwaitingSignature,
    Submitting,
    Confirming,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub network: Network,
    pub quote_ttl: Duration,
    pub commitment: Commitment,
    pub confirm_timeout: Duration,
    pub broadcast: BroadcastOptions,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            quote_ttl: DEFAULT_QUOTE_TTL,
            commitment: Commitment::Confirmed,
            confirm_timeout: Duration::from_secs(60),
            broadcast: BroadcastOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReceipt {
    pub signature: String,
    pub explorer_url: String,
    pub record: TradeRecord,
}

/// Drives one swap at a time: build -> sign -> broadcast -> confirm -> persist.
pub struct ExecutionController {
    cfg: ExecutionConfig,
    swaps: Arc<dyn SwapBuilder>,
    wallet: Arc<dyn Wallet>,
    rpc: Arc<dyn ChainRpc>,
    store: Arc<dyn TradeStore>,
    decimals: Arc<dyn TokenDecimals>,
    state: watch::Sender<ExecutionState>,
}

/// Puts the controller back in `Ready` however the pipeline ends, including
/// when the caller drops the `execute` future mid-flight.
struct ReturnToReady<'a>(&'a watch::Sender<ExecutionState>);

impl Drop for ReturnToReady<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ExecutionState::Ready);
    }
}

impl ExecutionController {
    pub fn new(
        cfg: ExecutionConfig,
        swaps: Arc<dyn SwapBuilder>,
        wallet: Arc<dyn Wallet>,
        rpc: Arc<dyn ChainRpc>,
        store: Arc<dyn TradeStore>,
        decimals: Arc<dyn TokenDecimals>,
    ) -> Self {
        let (state, _) = watch::channel(ExecutionState::Ready);
        Self { cfg, swaps, wallet, rpc, store, decimals, state }
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.state.subscribe()
    }

    /// `quote` is the caller's snapshot of the current quote, taken as execution starts.
    pub async fn execute(&self, quote: Option<QuoteResult>) -> Result<ExecutionReceipt, ExecutionError> {
        if self.state() != ExecutionState::Ready {
            return Err(ExecutionError::Busy);
        }
        let (quote, wallet_address) = self.check_preconditions(quote)?;

        let claimed = self.state.send_if_modified(|s| {
            if *s == ExecutionState::Ready {
                *s = ExecutionState::BuildingTransaction;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ExecutionError::Busy);
        }
        let _ready = ReturnToReady(&self.state);

        info!(
            input = %quote.input_mint,
            output = %quote.output_mint,
            in_amount = %quote.in_amount,
            out_amount = %quote.out_amount,
            "execution.start"
        );

        let outcome = self.run(&quote, &wallet_address).await;
        match &outcome {
            Ok(receipt) => info!(signature = %receipt.signature, "execution.succeeded"),
            Err(e) if e.is_user_cancellation() => {
                self.transition(ExecutionState::Failed);
                info!("execution.cancelled_by_user");
            }
            Err(e) => {
                self.transition(ExecutionState::Failed);
                match e.funds_outcome() {
                    FundsOutcome::NotMoved => warn!(error = %e, "execution.failed"),
                    outcome => error!(error = %e, ?outcome, signature = e.signature().unwrap_or(""), "execution.failed"),
                }
            }
        }
        outcome
    }

    fn check_preconditions(&self, quote: Option<QuoteResult>) -> Result<(QuoteResult, String), ExecutionError> {
        if !self.cfg.network.supports_aggregator() {
            return Err(ExecutionError::NetworkUnsupported);
        }
        let wallet_address = match self.wallet.public_address() {
            Some(addr) if self.wallet.is_connected() => addr,
            _ => return Err(ExecutionError::WalletNotConnected),
        };
        let quote = quote.ok_or(ExecutionError::NoQuote)?;
        if quote.approximate {
            return Err(ExecutionError::ApproximateQuote);
        }
        self.ensure_fresh(&quote)?;
        Ok((quote, wallet_address))
    }

    fn ensure_fresh(&self, quote: &QuoteResult) -> Result<(), ExecutionError> {
        let now = Utc::now();
        if quote.is_stale(now, self.cfg.quote_ttl) {
            return Err(ExecutionError::StaleQuote { age_secs: quote.age(now).num_seconds() });
        }
        Ok(())
    }

    async fn run(&self, quote: &QuoteResult, wallet_address: &str) -> Result<ExecutionReceipt, ExecutionError> {
        let tx = self.swaps.build_swap_transaction(quote, wallet_address).await?;
        // Building can outlast the TTL; an expired quote never reaches the wallet.
        self.ensure_fresh(quote)?;

        self.transition(ExecutionState::AwaitingSignature);
        let signed = self.wallet.sign(&tx).await.map_err(|e| match e {
            WalletError::UserRejected => ExecutionError::UserRejectedSignature,
            WalletError::NotConnected => ExecutionError::WalletNotConnected,
            WalletError::Signing(reason) => ExecutionError::SigningFailed(reason),
        })?;
        // Same for a signature prompt left open too long: signed but never sent.
        self.ensure_fresh(quote)?;

        // From here on the transaction may land; every failure must carry its signature.
        self.transition(ExecutionState::Submitting);
        let signature = self.rpc.broadcast(&signed, self.cfg.broadcast).await.map_err(|e| {
            ExecutionError::BroadcastFailed { signature: signed.signature.clone(), reason: e.to_string() }
        })?;

        self.transition(ExecutionState::Confirming);
        match self.rpc.await_confirmation(&signature, self.cfg.commitment, self.cfg.confirm_timeout).await {
            Ok(ConfirmationOutcome::Confirmed) => {}
            Ok(ConfirmationOutcome::Failed(reason)) => {
                return Err(ExecutionError::TransactionFailed { signature, reason });
            }
            Ok(ConfirmationOutcome::TimedOut) => return Err(ExecutionError::ConfirmationTimeout { signature }),
            Err(e) => {
                warn!(%signature, error = %e, "execution.confirmation.rpc_error");
                return Err(ExecutionError::ConfirmationTimeout { signature });
            }
        }

        self.transition(ExecutionState::Succeeded);
        let record = self.trade_record(quote, wallet_address, &signature).await;
        self.store
            .create_trade_record(&record)
            .await
            .map_err(|e| ExecutionError::PersistenceFailed { signature: signature.clone(), reason: e.to_string() })?;

        Ok(ExecutionReceipt {
            explorer_url: explorer_url(&signature, self.cfg.network),
            signature,
            record,
        })
    }

    async fn trade_record(&self, quote: &QuoteResult, wallet_address: &str, signature: &str) -> TradeRecord {
        let input_decimals = self.decimals.resolve_decimals(&quote.input_mint).await;
        let output_decimals = self.decimals.resolve_decimals(&quote.output_mint).await;
        TradeRecord {
            wallet_address: wallet_address.to_string(),
            direction: TradeDirection::for_input(&quote.input_mint),
            input_mint: quote.input_mint.clone(),
            output_mint: quote.output_mint.clone(),
            input_amount: from_base_units(quote.in_amount_base().unwrap_or(0), input_decimals),
            output_amount_estimate: from_base_units(quote.out_amount_base().unwrap_or(0), output_decimals),
            transaction_signature: Some(signature.to_string()),
            created_at: Utc::now(),
        }
    }

    fn transition(&self, next: ExecutionState) {
        self.state.send_replace(next);
        info!(state = ?next, "execution.state");
    }
}
