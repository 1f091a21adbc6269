use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use swap_terminal::config::Config;
use swap_terminal::domain::{explorer_url, SOL_MINT};
use swap_terminal::error::ExecutionError;
use swap_terminal::jupiter::{JupiterClient, SwapTransaction};
use swap_terminal::monitoring;
use swap_terminal::ports::{TokenDecimals, TradeStore, Wallet};
use swap_terminal::rpc::SolanaRpc;
use swap_terminal::session::{AnnotatedQuote, Collaborators, Session, SessionOptions};
use swap_terminal::store::{MemoryTradeStore, SupabaseTradeStore, DEFAULT_HISTORY_LIMIT};
use swap_terminal::tokens::{FileMetadataStorage, JupiterTokenSource, TokenMetadataCache};
use swap_terminal::wallet::{KeypairWallet, NoWallet};

/// Debounce plus a full failover pass, with headroom.
const QUOTE_WAIT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "swap_terminal", about = "Quote and execute token swaps through the Jupiter aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print an annotated quote.
    Quote(TradeArgs),
    /// Quote, then sign and submit with the configured keypair.
    Swap {
        #[command(flatten)]
        trade: TradeArgs,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// List recorded trades for the keypair's address.
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
}

#[derive(Args)]
struct TradeArgs {
    /// Input mint; defaults to wrapped SOL.
    #[arg(long, default_value = SOL_MINT)]
    input: String,
    #[arg(long)]
    output: String,
    /// Decimal amount of the input token.
    #[arg(long)]
    amount: String,
    #[arg(long)]
    slippage_bps: Option<u16>,
}

struct Runtime {
    session: Session,
    tokens: Arc<TokenMetadataCache>,
}

fn build(cfg: &Config, approval_prompt: bool) -> Result<Runtime> {
    let jupiter = Arc::new(JupiterClient::new(cfg.aggregator_config())?);

    let token_source = JupiterTokenSource::new(cfg.token_api_url.clone(), Duration::from_millis(cfg.aggregator_timeout_ms))?;
    let tokens = Arc::new(TokenMetadataCache::open(
        Some(Box::new(token_source)),
        Some(Box::new(FileMetadataStorage::new(&cfg.token_cache_path))),
    ));

    let wallet: Arc<dyn Wallet> = match &cfg.sol_keypair_path {
        Some(path) => {
            let wallet = KeypairWallet::from_file(path)?;
            info!(address = %wallet.pubkey_string(), "wallet.loaded");
            if approval_prompt {
                Arc::new(wallet.with_approval(Box::new(confirm_on_stdin)))
            } else {
                Arc::new(wallet)
            }
        }
        None => Arc::new(NoWallet),
    };

    let store: Arc<dyn TradeStore> = match (&cfg.supabase_url, &cfg.supabase_anon_key) {
        (Some(url), Some(key)) => Arc::new(SupabaseTradeStore::new(url, key)?),
        _ => Arc::new(MemoryTradeStore::new()),
    };

    let decimals: Arc<dyn TokenDecimals> = tokens.clone();
    let session = Session::start(
        Collaborators {
            quotes: jupiter.clone(),
            swaps: jupiter,
            wallet,
            rpc: Arc::new(SolanaRpc::new(cfg.rpc_url.clone())),
            store,
            decimals,
        },
        SessionOptions {
            execution: cfg.execution_config(),
            debounce: cfg.debounce(),
            thresholds: cfg.impact_thresholds(),
            max_slippage_bps: cfg.max_slippage_bps,
        },
    );
    Ok(Runtime { session, tokens })
}

/// Stands in for the wallet's approve/reject dialog.
fn confirm_on_stdin(tx: &SwapTransaction) -> bool {
    let fee = tx.prioritization_fee_lamports.map(|f| f.to_string()).unwrap_or_else(|| "auto".into());
    print!("Sign and submit this swap (priority fee {fee} lamports)? [y/N] ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn request_quote(rt: &mut Runtime, cfg: &Config, args: &TradeArgs) -> Result<AnnotatedQuote> {
    let s = &mut rt.session;
    s.set_input_mint(&args.input)?;
    s.set_output_mint(&args.output)?;
    s.set_slippage_bps(args.slippage_bps.unwrap_or(cfg.slippage_bps))?;
    s.set_amount(&args.amount);

    let quote = s.settled_quote(QUOTE_WAIT).await?;
    Ok(s.annotate(&quote).await)
}

async fn print_quote(rt: &Runtime, q: &AnnotatedQuote) {
    let input = rt.tokens.resolve(&q.quote.input_mint).await;
    let output = rt.tokens.resolve(&q.quote.output_mint).await;
    println!("{} -> {}", input.symbol, output.symbol);
    println!("  out:      {} {}", q.output_amount, output.symbol);
    println!("  route:    {}", q.route);
    println!("  impact:   {:.4}% ({:?})", q.impact.value, q.impact.severity);
    println!("  slippage: {} bps", q.quote.slippage_bps);
    if let Some(w) = q.slippage_warning {
        println!("  warning:  {w}");
    }
    if q.quote.approximate {
        println!("  note:     price estimate only, not executable");
    }
    if output.assumed {
        println!("  note:     {} decimals assumed for {}", output.decimals, output.mint);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env if present
    let _ = dotenvy::dotenv();

    monitoring::init_tracing();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    info!(cfg = ?cfg.redacted(), "boot");

    match cli.command {
        Command::Quote(args) => {
            let mut rt = build(&cfg, false)?;
            let q = request_quote(&mut rt, &cfg, &args).await?;
            print_quote(&rt, &q).await;
        }
        Command::Swap { trade, yes } => {
            let mut rt = build(&cfg, !yes)?;
            let q = request_quote(&mut rt, &cfg, &trade).await?;
            print_quote(&rt, &q).await;

            match rt.session.execute().await {
                Ok(receipt) => {
                    println!("confirmed: {}", receipt.signature);
                    println!("  {}", receipt.explorer_url);
                }
                Err(e) if e.is_user_cancellation() => println!("cancelled"),
                Err(e) => {
                    if let Some(sig) = e.signature() {
                        eprintln!("check: {}", explorer_url(sig, cfg.network));
                    }
                    if let ExecutionError::PersistenceFailed { .. } = e {
                        eprintln!("the swap went through; only the history entry is missing");
                    }
                    return Err(e).context("swap failed");
                }
            }
        }
        Command::History { limit } => {
            let rt = build(&cfg, false)?;
            let records = rt.session.history(Some(limit)).await?;
            if records.is_empty() {
                println!("no trades recorded");
            }
            for r in records {
                println!(
                    "{}  {:<4}  {} -> {}  in={} out~{}  {}",
                    r.created_at.format("%Y-%m-%d %H:%M:%S"),
                    r.direction,
                    r.input_mint,
                    r.output_mint,
                    r.input_amount,
                    r.output_amount_estimate,
                    r.transaction_signature.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}
