use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT_MAINNET: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDC_MINT_DEVNET: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

pub const DEFAULT_SLIPPAGE_BPS: u16 = 100;
pub const MAX_SLIPPAGE_BPS: u16 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Devnet,
}

impl Network {
    /// The aggregator only routes on mainnet.
    pub fn supports_aggregator(self) -> bool {
        matches!(self, Network::Mainnet)
    }

    pub fn default_rpc_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.mainnet-beta.solana.com",
            Network::Devnet => "https://api.devnet.solana.com",
        }
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(anyhow!("unknown network: {other}")),
        }
    }
}

pub fn explorer_url(signature: &str, network: Network) -> String {
    match network {
        Network::Mainnet => format!("https://solscan.io/tx/{signature}"),
        Network::Devnet => format!("https://solscan.io/tx/{signature}?cluster=devnet"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    /// Spending the native token is a buy; anything else is a sell.
    pub fn for_input(input_mint: &str) -> Self {
        if input_mint == SOL_MINT {
            TradeDirection::Buy
        } else {
            TradeDirection::Sell
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::Buy => f.write_str("BUY"),
            TradeDirection::Sell => f.write_str("SELL"),
        }
    }
}

/// What the user currently wants to trade. Empty strings mean "unset".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub input_mint: String,
    pub output_mint: String,
    pub input_amount: String,
    pub slippage_bps: u16,
}

impl Default for TradeIntent {
    fn default() -> Self {
        Self {
            input_mint: SOL_MINT.to_string(),
            output_mint: String::new(),
            input_amount: String::new(),
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
        }
    }
}

impl TradeIntent {
    pub fn tokens_set(&self) -> bool {
        !self.input_mint.is_empty() && !self.output_mint.is_empty()
    }

    /// Both tokens set and distinct. Amount validity is checked against decimals separately.
    pub fn has_pair(&self) -> bool {
        self.tokens_set() && self.input_mint != self.output_mint
    }

    pub fn set_input_mint(&mut self, mint: impl Into<String>) -> anyhow::Result<()> {
        let mint = mint.into();
        if !mint.is_empty() && mint == self.output_mint {
            return Err(anyhow!("input and output token must differ"));
        }
        self.input_mint = mint;
        Ok(())
    }

    pub fn set_output_mint(&mut self, mint: impl Into<String>) -> anyhow::Result<()> {
        let mint = mint.into();
        if !mint.is_empty() && mint == self.input_mint {
            return Err(anyhow!("input and output token must differ"));
        }
        self.output_mint = mint;
        Ok(())
    }

    pub fn set_slippage_bps(&mut self, bps: u16) {
        self.slippage_bps = bps.min(MAX_SLIPPAGE_BPS);
    }

    /// Swap sides and clear the amount, which no longer refers to the input token.
    pub fn flip(&mut self) {
        std::mem::swap(&mut self.input_mint, &mut self.output_mint);
        self.input_amount.clear();
    }

    /// Prefill from a signal: buys spend SOL for `token`, sells spend `token` for SOL.
    pub fn prefill(&mut self, token: &str, amount: f64, direction: TradeDirection) {
        let (input, output) = match direction {
            TradeDirection::Buy => (SOL_MINT, token),
            TradeDirection::Sell => (token, SOL_MINT),
        };
        self.input_mint = input.to_string();
        self.output_mint = output.to_string();
        self.input_amount = amount.to_string();
    }
}

/// One confirmed swap, as handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub wallet_address: String,
    pub direction: TradeDirection,
    pub input_mint: String,
    pub output_mint: String,
    pub input_amount: f64,
    #[serde(rename = "output_amount_est")]
    pub output_amount_estimate: f64,
    #[serde(rename = "tx_sig", default, skip_serializing_if = "Option::is_none")]
    pub transaction_signature: Option<String>,
    pub created_at: DateTime<Utc>,
}
