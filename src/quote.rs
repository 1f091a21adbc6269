use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{Network, TradeIntent};
use crate::error::QuoteError;
use crate::jupiter::{QuoteParams, QuoteResult};
use crate::ports::{QuoteSource, TokenDecimals};
use crate::units::to_base_units;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(450);

/// Consecutive silent re-quotes after a transient failure, per intent.
const SILENT_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteState {
    Idle,
    Debouncing,
    Fetching,
    Quoted(QuoteResult),
    Failed(QuoteError),
}

impl QuoteState {
    pub fn quote(&self) -> Option<&QuoteResult> {
        match self {
            QuoteState::Quoted(q) => Some(q),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QuoteError> {
        match self {
            QuoteState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub seq: u64,
    pub params: QuoteParams,
}

/// Synchronous core of the quote controller. Every intent change bumps the
/// sequence number; a completion is applied only if it carries the current one.
#[derive(Debug)]
pub struct QuoteMachine {
    network: Network,
    state: QuoteState,
    seq: u64,
}

impl QuoteMachine {
    pub fn new(network: Network) -> Self {
        Self { network, state: QuoteState::Idle, seq: 0 }
    }

    pub fn state(&self) -> &QuoteState {
        &self.state
    }

    pub fn intent_changed(&mut self) -> u64 {
        self.seq += 1;
        self.state = QuoteState::Debouncing;
        self.seq
    }

    pub fn debounce_elapsed(&mut self, intent: &TradeIntent, input_decimals: u8, output_decimals: u8) -> Option<FetchTicket> {
        if !self.network.supports_aggregator() {
            self.state = QuoteState::Failed(QuoteError::NetworkUnsupported);
            return None;
        }
        if !intent.has_pair() {
            self.state = QuoteState::Idle;
            return None;
        }
        let Ok(amount) = to_base_units(&intent.input_amount, input_decimals) else {
            self.state = QuoteState::Idle;
            return None;
        };

        self.state = QuoteState::Fetching;
        Some(FetchTicket {
            seq: self.seq,
            params: QuoteParams {
                input_mint: intent.input_mint.clone(),
                output_mint: intent.output_mint.clone(),
                amount,
                slippage_bps: intent.slippage_bps,
                input_decimals,
                output_decimals,
            },
        })
    }

    /// Returns false when the result belongs to a superseded intent and was dropped.
    pub fn fetch_completed(&mut self, seq: u64, result: Result<QuoteResult, QuoteError>) -> bool {
        if seq != self.seq || self.state != QuoteState::Fetching {
            debug!(seq, current = self.seq, "quote.result.discarded");
            return false;
        }
        self.state = match result {
            Ok(q) => QuoteState::Quoted(q),
            Err(e) => QuoteState::Failed(e),
        };
        true
    }

    pub fn clear(&mut self) {
        self.seq += 1;
        self.state = QuoteState::Idle;
    }
}

enum Command {
    Intent(TradeIntent),
    Clear,
}

type QuoteFuture = Pin<Box<dyn Future<Output = Result<QuoteResult, QuoteError>> + Send>>;

struct InFlight {
    seq: u64,
    fut: QuoteFuture,
}

/// Debouncing driver around [`QuoteMachine`], running as its own task.
/// Readers get clones of the published state, never a live reference.
pub struct QuoteController {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<QuoteState>,
    task: JoinHandle<()>,
}

impl QuoteController {
    pub fn spawn(
        source: Arc<dyn QuoteSource>,
        decimals: Arc<dyn TokenDecimals>,
        network: Network,
        debounce: Duration,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (tx, state) = watch::channel(QuoteState::Idle);
        let task = tokio::spawn(run(rx, tx, source, decimals, network, debounce));
        Self { commands, state, task }
    }

    pub fn update_intent(&self, intent: TradeIntent) {
        let _ = self.commands.send(Command::Intent(intent));
    }

    /// Discards the current quote and any pending fetch.
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    pub fn state(&self) -> QuoteState {
        self.state.borrow().clone()
    }

    pub fn current_quote(&self) -> Option<QuoteResult> {
        self.state.borrow().quote().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteState> {
        self.state.clone()
    }
}

impl Drop for QuoteController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<QuoteState>,
    source: Arc<dyn QuoteSource>,
    decimals: Arc<dyn TokenDecimals>,
    network: Network,
    debounce: Duration,
) {
    let mut machine = QuoteMachine::new(network);
    let mut intent: Option<TradeIntent> = None;
    let mut deadline: Option<Instant> = None;
    let mut in_flight: Option<InFlight> = None;
    let mut silent_retries = 0u32;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                // Dropping the future cancels interest; the request may still finish upstream.
                in_flight = None;
                match cmd {
                    None => break,
                    Some(Command::Intent(next)) => {
                        machine.intent_changed();
                        intent = Some(next);
                        deadline = Some(Instant::now() + debounce);
                        silent_retries = 0;
                    }
                    Some(Command::Clear) => {
                        machine.clear();
                        deadline = None;
                    }
                }
                state.send_replace(machine.state().clone());
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let Some(current) = intent.clone() else { continue };
                let input_decimals = decimals.resolve_decimals(&current.input_mint).await;
                let output_decimals = decimals.resolve_decimals(&current.output_mint).await;
                let retrying = matches!(machine.state(), QuoteState::Failed(_));

                if let Some(ticket) = machine.debounce_elapsed(&current, input_decimals, output_decimals) {
                    debug!(seq = ticket.seq, amount = ticket.params.amount, "quote.fetch");
                    let source = source.clone();
                    let params = ticket.params;
                    in_flight = Some(InFlight {
                        seq: ticket.seq,
                        fut: Box::pin(async move { source.fetch_quote(&params).await }),
                    });
                    // A silent retry keeps the failure on screen until it resolves.
                    if retrying {
                        continue;
                    }
                }
                state.send_replace(machine.state().clone());
            }
            (seq, result) = next_completion(&mut in_flight) => {
                in_flight = None;
                let transient = matches!(&result, Err(e) if e.is_transient());
                if machine.fetch_completed(seq, result) {
                    if transient && silent_retries < SILENT_RETRY_LIMIT {
                        silent_retries += 1;
                        info!(seq, attempt = silent_retries, "quote.retry.scheduled");
                        deadline = Some(Instant::now() + debounce);
                    } else if !transient {
                        silent_retries = 0;
                    }
                    state.send_replace(machine.state().clone());
                }
            }
        }
    }
}

async fn next_completion(slot: &mut Option<InFlight>) -> (u64, Result<QuoteResult, QuoteError>) {
    match slot {
        Some(f) => (f.seq, f.fut.as_mut().await),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SOL_MINT, USDC_MINT_MAINNET};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedDecimals;

    #[async_trait]
    impl TokenDecimals for FixedDecimals {
        async fn resolve_decimals(&self, mint: &str) -> u8 {
            if mint == USDC_MINT_MAINNET { 6 } else { 9 }
        }
    }

    /// Echoes the requested amount back as the quote, after a per-amount delay.
    #[derive(Default)]
    struct ScriptedSource {
        calls: AtomicUsize,
        delays: Mutex<Vec<(u64, Duration)>>,
        failures: Mutex<VecDeque<QuoteError>>,
    }

    #[async_trait]
    impl QuoteSource for ScriptedSource {
        async fn fetch_quote(&self, params: &QuoteParams) -> Result<QuoteResult, QuoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self
                .delays
                .lock()
                .unwrap()
                .iter()
                .find(|(amount, _)| *amount == params.amount)
                .map(|(_, d)| *d);
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            let failure = self.failures.lock().unwrap().pop_front();
            if let Some(err) = failure {
                return Err(err);
            }
            Ok(sample_quote(params))
        }
    }

    fn sample_quote(params: &QuoteParams) -> QuoteResult {
        QuoteResult {
            input_mint: params.input_mint.clone(),
            output_mint: params.output_mint.clone(),
            in_amount: params.amount.to_string(),
            out_amount: (params.amount / 1_000 * 150).to_string(),
            price_impact_pct: serde_json::json!("0.1"),
            route_plan: vec![],
            slippage_bps: params.slippage_bps,
            fetched_at: Utc::now(),
            approximate: false,
            source: "test".into(),
            raw: serde_json::json!({}),
        }
    }

    fn intent(amount: &str) -> TradeIntent {
        TradeIntent {
            input_mint: SOL_MINT.into(),
            output_mint: USDC_MINT_MAINNET.into(),
            input_amount: amount.into(),
            slippage_bps: 100,
        }
    }

    fn controller(source: Arc<ScriptedSource>, network: Network) -> QuoteController {
        QuoteController::spawn(source, Arc::new(FixedDecimals), network, DEFAULT_DEBOUNCE)
    }

    #[test]
    fn machine_discards_superseded_results() {
        let mut m = QuoteMachine::new(Network::Mainnet);
        m.intent_changed();
        let first = m.debounce_elapsed(&intent("1"), 9, 6).unwrap();
        m.intent_changed();
        let second = m.debounce_elapsed(&intent("2"), 9, 6).unwrap();

        assert!(!m.fetch_completed(first.seq, Ok(sample_quote(&first.params))));
        assert_eq!(m.state(), &QuoteState::Fetching);
        assert!(m.fetch_completed(second.seq, Ok(sample_quote(&second.params))));
        assert_eq!(m.state().quote().unwrap().in_amount, "2000000000");
    }

    #[test]
    fn machine_invalid_intent_goes_idle() {
        let mut m = QuoteMachine::new(Network::Mainnet);
        m.intent_changed();
        assert!(m.debounce_elapsed(&intent("abc"), 9, 6).is_none());
        assert_eq!(m.state(), &QuoteState::Idle);

        let mut unset = intent("1");
        unset.output_mint.clear();
        m.intent_changed();
        assert!(m.debounce_elapsed(&unset, 9, 6).is_none());
        assert_eq!(m.state(), &QuoteState::Idle);
    }

    #[test]
    fn machine_late_result_after_clear_is_dropped() {
        let mut m = QuoteMachine::new(Network::Mainnet);
        m.intent_changed();
        let t = m.debounce_elapsed(&intent("1"), 9, 6).unwrap();
        m.clear();
        assert!(!m.fetch_completed(t.seq, Err(QuoteError::NoRoute)));
        assert_eq!(m.state(), &QuoteState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_yields_one_fetch_for_the_last_intent() {
        let source = Arc::new(ScriptedSource::default());
        let qc = controller(source.clone(), Network::Mainnet);

        qc.update_intent(intent("1"));
        qc.update_intent(intent("1.5"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(qc.state(), QuoteState::Debouncing);
        qc.update_intent(intent("2"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(qc.current_quote().unwrap().in_amount, "2000000000");
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_fetch_for_superseded_intent_is_discarded() {
        let source = Arc::new(ScriptedSource::default());
        source.delays.lock().unwrap().push((1_000_000_000, Duration::from_secs(2)));
        let qc = controller(source.clone(), Network::Mainnet);

        qc.update_intent(intent("1"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(qc.state(), QuoteState::Fetching);

        qc.update_intent(intent("3"));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(qc.current_quote().unwrap().in_amount, "3000000000");
    }

    #[tokio::test(start_paused = true)]
    async fn devnet_short_circuits_without_calling_the_aggregator() {
        let source = Arc::new(ScriptedSource::default());
        let qc = controller(source.clone(), Network::Devnet);

        qc.update_intent(intent("1"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(qc.state(), QuoteState::Failed(QuoteError::NetworkUnsupported));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_silently() {
        let source = Arc::new(ScriptedSource::default());
        source
            .failures
            .lock()
            .unwrap()
            .push_back(QuoteError::UpstreamUnavailable { attempts: 2, last: "500".into() });
        let qc = controller(source.clone(), Network::Mainnet);

        qc.update_intent(intent("1"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(qc.state().error().is_some_and(QuoteError::is_transient));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(qc.current_quote().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_stays_visible_while_the_retry_is_in_flight() {
        let source = Arc::new(ScriptedSource::default());
        source.delays.lock().unwrap().push((1_000_000_000, Duration::from_secs(1)));
        source
            .failures
            .lock()
            .unwrap()
            .push_back(QuoteError::UpstreamUnavailable { attempts: 2, last: "timeout".into() });
        let qc = controller(source.clone(), Network::Mainnet);

        qc.update_intent(intent("1"));
        tokio::time::sleep(Duration::from_millis(1_600)).await;
        assert!(qc.state().error().is_some_and(QuoteError::is_transient));

        let rx = qc.subscribe();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(!rx.has_changed().unwrap());
        assert!(qc.state().error().is_some_and(QuoteError::is_transient));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(qc.current_quote().unwrap().in_amount, "1000000000");
    }

    #[tokio::test(start_paused = true)]
    async fn no_route_is_surfaced_and_not_retried() {
        let source = Arc::new(ScriptedSource::default());
        source.failures.lock().unwrap().push_back(QuoteError::NoRoute);
        let qc = controller(source.clone(), Network::Mainnet);

        qc.update_intent(intent("1"));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(qc.state(), QuoteState::Failed(QuoteError::NoRoute));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_the_quote() {
        let source = Arc::new(ScriptedSource::default());
        let qc = controller(source, Network::Mainnet);

        qc.update_intent(intent("1"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(qc.current_quote().is_some());

        qc.clear();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(qc.state(), QuoteState::Idle);
    }
}
