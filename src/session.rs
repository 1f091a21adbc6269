use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain::{TradeDirection, TradeIntent, TradeRecord, MAX_SLIPPAGE_BPS};
use crate::error::ExecutionError;
use crate::execution::{ExecutionConfig, ExecutionController, ExecutionReceipt, ExecutionState};
use crate::jupiter::{ensure_slippage_bounds, QuoteResult};
use crate::ports::{ChainRpc, QuoteSource, SwapBuilder, TokenDecimals, TradeStore, Wallet};
use crate::quote::{QuoteController, QuoteState, DEFAULT_DEBOUNCE};
use crate::risk::{assess_price_impact_with, format_route, slippage_warning, ImpactThresholds, PriceImpactAssessment};
use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::units::{format_base_units, to_base_units};

pub struct Collaborators {
    pub quotes: Arc<dyn QuoteSource>,
    pub swaps: Arc<dyn SwapBuilder>,
    pub wallet: Arc<dyn Wallet>,
    pub rpc: Arc<dyn ChainRpc>,
    pub store: Arc<dyn TradeStore>,
    pub decimals: Arc<dyn TokenDecimals>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub execution: ExecutionConfig,
    pub debounce: Duration,
    pub thresholds: ImpactThresholds,
    pub max_slippage_bps: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            debounce: DEFAULT_DEBOUNCE,
            thresholds: ImpactThresholds::default(),
            max_slippage_bps: MAX_SLIPPAGE_BPS,
        }
    }
}

/// A quote with the display annotations shown next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedQuote {
    pub quote: QuoteResult,
    /// Exact decimal rendering of `out_amount` in output-token units.
    pub output_amount: String,
    pub impact: PriceImpactAssessment,
    pub route: String,
    pub slippage_warning: Option<&'static str>,
}

/// One user's terminal: owns the trade intent and feeds every edit to the
/// quote controller. Execution always works on a snapshot of the current quote.
pub struct Session {
    intent: TradeIntent,
    quotes: QuoteController,
    execution: ExecutionController,
    wallet: Arc<dyn Wallet>,
    store: Arc<dyn TradeStore>,
    decimals: Arc<dyn TokenDecimals>,
    thresholds: ImpactThresholds,
    max_slippage_bps: u16,
}

impl Session {
    /// Spawns the quote controller, so this must run inside a tokio runtime.
    pub fn start(parts: Collaborators, opts: SessionOptions) -> Self {
        let network = opts.execution.network;
        let quotes = QuoteController::spawn(parts.quotes, parts.decimals.clone(), network, opts.debounce);
        let execution = ExecutionController::new(
            opts.execution,
            parts.swaps,
            parts.wallet.clone(),
            parts.rpc,
            parts.store.clone(),
            parts.decimals.clone(),
        );
        Self {
            intent: TradeIntent::default(),
            quotes,
            execution,
            wallet: parts.wallet,
            store: parts.store,
            decimals: parts.decimals,
            thresholds: opts.thresholds,
            max_slippage_bps: opts.max_slippage_bps,
        }
    }

    pub fn intent(&self) -> &TradeIntent {
        &self.intent
    }

    pub fn set_input_mint(&mut self, mint: &str) -> Result<()> {
        self.intent.set_input_mint(mint)?;
        self.publish();
        Ok(())
    }

    pub fn set_output_mint(&mut self, mint: &str) -> Result<()> {
        self.intent.set_output_mint(mint)?;
        self.publish();
        Ok(())
    }

    pub fn set_amount(&mut self, amount: &str) {
        self.intent.input_amount = amount.trim().to_string();
        self.publish();
    }

    /// Out-of-range values are refused and the intent keeps its tolerance.
    pub fn set_slippage_bps(&mut self, bps: u16) -> Result<()> {
        ensure_slippage_bounds(bps, self.max_slippage_bps)?;
        self.intent.set_slippage_bps(bps);
        self.publish();
        Ok(())
    }

    pub fn flip(&mut self) {
        self.intent.flip();
        self.publish();
    }

    pub fn prefill(&mut self, token: &str, amount: f64, direction: TradeDirection) {
        self.intent.prefill(token, amount, direction);
        self.publish();
    }

    fn publish(&self) {
        debug!(
            input = %self.intent.input_mint,
            output = %self.intent.output_mint,
            amount = %self.intent.input_amount,
            slippage_bps = self.intent.slippage_bps,
            "session.intent"
        );
        self.quotes.update_intent(self.intent.clone());
    }

    pub fn quote_state(&self) -> QuoteState {
        self.quotes.state()
    }

    pub fn subscribe_quotes(&self) -> watch::Receiver<QuoteState> {
        self.quotes.subscribe()
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.execution.state()
    }

    pub fn subscribe_execution(&self) -> watch::Receiver<ExecutionState> {
        self.execution.subscribe()
    }

    /// Waits for the quote controller to settle on the current intent.
    pub async fn settled_quote(&self, timeout: Duration) -> Result<QuoteResult> {
        let input_decimals = self.decimals.resolve_decimals(&self.intent.input_mint).await;
        let expected = to_base_units(&self.intent.input_amount, input_decimals)?;
        let (input, output) = (self.intent.input_mint.clone(), self.intent.output_mint.clone());

        let mut rx = self.quotes.subscribe();
        let mut pending_seen = false;
        let wait = rx.wait_for(|s| match s {
            QuoteState::Debouncing | QuoteState::Fetching => {
                pending_seen = true;
                false
            }
            QuoteState::Quoted(q) => {
                q.input_mint == input && q.output_mint == output && q.in_amount_base() == Some(expected)
            }
            QuoteState::Failed(_) => pending_seen,
            QuoteState::Idle => false,
        });
        let settled = tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| anyhow!("no quote within {timeout:?}"))?
            .map_err(|_| anyhow!("quote controller stopped"))?
            .clone();

        match settled {
            QuoteState::Quoted(q) => Ok(q),
            QuoteState::Failed(e) => Err(e.into()),
            other => Err(anyhow!("quote did not settle: {other:?}")),
        }
    }

    pub async fn annotate(&self, quote: &QuoteResult) -> AnnotatedQuote {
        let output_decimals = self.decimals.resolve_decimals(&quote.output_mint).await;
        let output_amount = quote
            .out_amount_base()
            .map(|v| format_base_units(v, output_decimals))
            .unwrap_or_else(|| quote.out_amount.clone());
        AnnotatedQuote {
            quote: quote.clone(),
            output_amount,
            impact: assess_price_impact_with(&quote.price_impact_pct, self.thresholds),
            route: format_route(&quote.route_plan),
            slippage_warning: slippage_warning(quote.slippage_bps),
        }
    }

    pub async fn annotated_quote(&self) -> Option<AnnotatedQuote> {
        let quote = self.quotes.current_quote()?;
        Some(self.annotate(&quote).await)
    }

    /// Executes against the quote current at call time. On success the amount
    /// and quote are cleared so the same trade is not repeated by accident.
    pub async fn execute(&mut self) -> Result<ExecutionReceipt, ExecutionError> {
        let snapshot = self.quotes.current_quote();
        let receipt = self.execution.execute(snapshot).await?;

        self.intent.input_amount.clear();
        self.quotes.update_intent(self.intent.clone());
        self.quotes.clear();
        info!(signature = %receipt.signature, url = %receipt.explorer_url, "session.trade.completed");
        Ok(receipt)
    }

    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<TradeRecord>> {
        let wallet = self.wallet.public_address().ok_or_else(|| anyhow!("wallet not connected"))?;
        self.store.list_trade_records(&wallet, limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).await
    }
}
