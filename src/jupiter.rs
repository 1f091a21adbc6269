use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AttemptFailure, QuoteError, SwapBuildError};
use crate::ports::{QuoteSource, SwapBuilder};

const BODY_SNIPPET: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Base URLs in priority order; `/quote` and `/swap` are appended.
    pub endpoints: Vec<String>,
    pub timeout_ms: u64,
    /// Cap on endpoints tried per call.
    pub max_attempts: usize,
    /// Extra headers sent with every request (e.g. an API key or proxy credential).
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Price-only source used to synthesize an approximate quote when every endpoint fails.
    #[serde(default)]
    pub price_url: Option<String>,
    /// `None` keeps the aggregator-recommended default.
    #[serde(default)]
    pub wrap_and_unwrap_sol: Option<bool>,
    #[serde(default)]
    pub dynamic_compute_unit_limit: Option<bool>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://quote-api.jup.ag/v6".to_string(),
                "https://lite-api.jup.ag/swap/v1".to_string(),
            ],
            timeout_ms: 8_000,
            max_attempts: 2,
            headers: vec![],
            price_url: None,
            wrap_and_unwrap_sol: None,
            dynamic_compute_unit_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteParams {
    pub input_mint: String,
    pub output_mint: String,
    /// Amount in the input mint's base units.
    pub amount: u64,
    pub slippage_bps: u16,
    pub input_decimals: u8,
    pub output_decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub label: Option<String>,
    pub input_mint: Option<String>,
    pub output_mint: Option<String>,
    pub percent: Option<f64>,
}

/// Snapshot of one aggregator answer. Cloned, never shared, by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteResult {
    pub input_mint: String,
    pub output_mint: String,
    /// Base units, string-encoded as the aggregator sends them.
    pub in_amount: String,
    pub out_amount: String,
    pub price_impact_pct: Value,
    pub route_plan: Vec<RouteStep>,
    pub slippage_bps: u16,
    pub fetched_at: DateTime<Utc>,
    /// Synthesized from unit prices; not executable.
    pub approximate: bool,
    /// Endpoint that produced this quote.
    pub source: String,
    /// Untouched aggregator body, handed back verbatim when building the swap.
    pub raw: Value,
}

impl QuoteResult {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.fetched_at)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        self.age(now) > ttl
    }

    pub fn in_amount_base(&self) -> Option<u64> {
        self.in_amount.parse().ok()
    }

    pub fn out_amount_base(&self) -> Option<u64> {
        self.out_amount.parse().ok()
    }
}

/// Signable transaction as returned by the swap-build endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTransaction {
    /// base64 encoded VersionedTransaction
    pub payload: String,
    pub last_valid_block_height: Option<u64>,
    pub prioritization_fee_lamports: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    /// Amount in the input mint's base units (e.g. USDC has 6 decimals)
    pub amount: String,
    #[serde(rename = "slippageBps")]
    pub slippage_bps: u16,
    #[serde(rename = "onlyDirectRoutes", skip_serializing_if = "Option::is_none")]
    pub only_direct_routes: Option<bool>,
}

impl From<&QuoteParams> for QuoteRequest {
    fn from(p: &QuoteParams) -> Self {
        Self {
            input_mint: p.input_mint.clone(),
            output_mint: p.output_mint.clone(),
            amount: p.amount.to_string(),
            slippage_bps: p.slippage_bps,
            only_direct_routes: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuoteFields {
    #[serde(rename = "inputMint")]
    input_mint: String,
    #[serde(rename = "outputMint")]
    output_mint: String,
    #[serde(rename = "inAmount")]
    in_amount: String,
    #[serde(rename = "outAmount")]
    out_amount: String,
    #[serde(rename = "priceImpactPct", default)]
    price_impact_pct: Value,
    #[serde(rename = "routePlan", default)]
    route_plan: Vec<RoutePlanEntry>,
}

#[derive(Debug, Deserialize)]
struct RoutePlanEntry {
    #[serde(rename = "swapInfo", default)]
    swap_info: SwapInfo,
    #[serde(default)]
    percent: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SwapInfo {
    #[serde(default)]
    label: Option<String>,
    #[serde(rename = "inputMint", default)]
    input_mint: Option<String>,
    #[serde(rename = "outputMint", default)]
    output_mint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapRequest<'a> {
    #[serde(rename = "quoteResponse")]
    pub quote_response: &'a Value,

    #[serde(rename = "userPublicKey")]
    pub user_public_key: &'a str,

    #[serde(rename = "wrapAndUnwrapSol")]
    pub wrap_and_unwrap_sol: bool,

    #[serde(rename = "dynamicComputeUnitLimit")]
    pub dynamic_compute_unit_limit: bool,

    #[serde(rename = "prioritizationFeeLamports")]
    pub prioritization_fee_lamports: &'a str,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "swapTransaction", default)]
    swap_transaction: Option<String>,
    #[serde(rename = "lastValidBlockHeight", default)]
    last_valid_block_height: Option<u64>,
    #[serde(rename = "prioritizationFeeLamports", default)]
    prioritization_fee_lamports: Option<u64>,
}

#[derive(Clone)]
pub struct JupiterClient {
    endpoints: Vec<String>,
    max_attempts: usize,
    timeout: Duration,
    price_url: Option<String>,
    wrap_and_unwrap_sol: bool,
    dynamic_compute_unit_limit: bool,
    http: Client,
}

impl JupiterClient {
    pub fn new(cfg: AggregatorConfig) -> Result<Self> {
        let endpoints: Vec<String> = cfg
            .endpoints
            .iter()
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(anyhow!("at least one aggregator endpoint is required"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &cfg.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| anyhow!("invalid header {name}: {e}"))?;
            let value = HeaderValue::from_str(value).map_err(|e| anyhow!("invalid header value for {name}: {e}"))?;
            headers.insert(name, value);
        }

        let http = Client::builder().default_headers(headers).gzip(true).brotli(true).build()?;

        let max_attempts = match cfg.max_attempts {
            0 => endpoints.len(),
            n => n.min(endpoints.len()),
        };

        Ok(Self {
            endpoints,
            max_attempts,
            timeout: Duration::from_millis(cfg.timeout_ms.max(1)),
            price_url: cfg.price_url.map(|u| u.trim_end_matches('/').to_string()),
            wrap_and_unwrap_sol: cfg.wrap_and_unwrap_sol.unwrap_or(true),
            dynamic_compute_unit_limit: cfg.dynamic_compute_unit_limit.unwrap_or(true),
            http,
        })
    }

    /// Tries each endpoint once in priority order, then the price fallback.
    pub async fn quote(&self, params: &QuoteParams) -> Result<QuoteResult, QuoteError> {
        let req = QuoteRequest::from(params);
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for base in self.endpoints.iter().take(self.max_attempts) {
            let url = format!("{base}/quote");
            let attempt = self
                .send(self.http.get(&url).query(&req))
                .await
                .and_then(|body| parse_quote(body, params, base));
            match attempt {
                Ok(quote) => {
                    if !failures.is_empty() {
                        info!(endpoint = %base, failed_before = failures.len(), "aggregator.quote.recovered");
                    }
                    debug!(endpoint = %base, out_amount = %quote.out_amount, "aggregator.quote.ok");
                    return Ok(quote);
                }
                Err(failure) => {
                    warn!(endpoint = %base, error = %failure, "aggregator.quote.failover");
                    failures.push(failure);
                }
            }
        }

        if self.price_url.is_some() {
            match self.approximate_quote(params).await {
                Ok(quote) => {
                    warn!(out_amount = %quote.out_amount, "aggregator.quote.approximate");
                    return Ok(quote);
                }
                Err(failure) => warn!(error = %failure, "aggregator.price_fallback.failed"),
            }
        }

        Err(classify_quote_failures(&failures))
    }

    /// Builds at the endpoint that served the quote first, then the others in order.
    pub async fn swap(&self, quote: &QuoteResult, user_public_key: &str) -> Result<SwapTransaction, SwapBuildError> {
        if quote.approximate || quote.raw.is_null() {
            return Err(SwapBuildError::Upstream {
                attempts: 0,
                last: "approximate quotes cannot be built into transactions".into(),
            });
        }

        let req = SwapRequest {
            quote_response: &quote.raw,
            user_public_key,
            wrap_and_unwrap_sol: self.wrap_and_unwrap_sol,
            dynamic_compute_unit_limit: self.dynamic_compute_unit_limit,
            prioritization_fee_lamports: "auto",
        };

        let mut order: Vec<&String> = self.endpoints.iter().filter(|e| **e == quote.source).collect();
        order.extend(self.endpoints.iter().filter(|e| **e != quote.source));

        let mut attempts = 0;
        let mut missing_payload = false;
        let mut last = String::new();

        for base in order.into_iter().take(self.max_attempts) {
            attempts += 1;
            let url = format!("{base}/swap");
            let body = match self.send(self.http.post(&url).json(&req)).await {
                Ok(body) => body,
                Err(failure) => {
                    warn!(endpoint = %base, error = %failure, "aggregator.swap.failover");
                    last = failure.to_string();
                    continue;
                }
            };

            match serde_json::from_value::<SwapResponse>(body) {
                Ok(SwapResponse {
                    swap_transaction: Some(payload),
                    last_valid_block_height,
                    prioritization_fee_lamports,
                }) if !payload.is_empty() => {
                    info!(endpoint = %base, ?last_valid_block_height, "aggregator.swap.ok");
                    return Ok(SwapTransaction { payload, last_valid_block_height, prioritization_fee_lamports });
                }
                Ok(_) => {
                    warn!(endpoint = %base, "aggregator.swap.missing_payload");
                    missing_payload = true;
                    last = "missing swapTransaction".into();
                }
                Err(e) => {
                    warn!(endpoint = %base, error = %e, "aggregator.swap.malformed");
                    last = e.to_string();
                }
            }
        }

        if missing_payload {
            Err(SwapBuildError::MissingPayload)
        } else {
            Err(SwapBuildError::Upstream { attempts, last })
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, AttemptFailure> {
        let resp = request.timeout(self.timeout).send().await.map_err(classify_transport)?;
        let status = resp.status();
        let text = resp.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(AttemptFailure::Status { status: status.as_u16(), body: snippet(&text) });
        }

        let body: Value = serde_json::from_str(&text).map_err(|_| AttemptFailure::NonJson(snippet(&text)))?;
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
            let code = body.get("errorCode").and_then(Value::as_str).unwrap_or_default().to_string();
            return Err(AttemptFailure::Application { code, message });
        }
        Ok(body)
    }

    /// Out amount estimated as `in * price(in) / price(out)` from independently fetched unit prices.
    async fn approximate_quote(&self, params: &QuoteParams) -> Result<QuoteResult, AttemptFailure> {
        let Some(price_url) = self.price_url.as_deref() else {
            return Err(AttemptFailure::Transport("no price source configured".into()));
        };
        let ids = format!("{},{}", params.input_mint, params.output_mint);
        let body = self.send(self.http.get(price_url).query(&[("ids", ids.as_str())])).await?;

        let price_in = unit_price(&body, &params.input_mint)?;
        let price_out = unit_price(&body, &params.output_mint)?;

        let in_human = params.amount as f64 / 10f64.powi(params.input_decimals as i32);
        let out_human = in_human * price_in / price_out;
        let out_base = (out_human * 10f64.powi(params.output_decimals as i32)).floor();
        if !out_base.is_finite() || out_base < 1.0 || out_base > u64::MAX as f64 {
            return Err(AttemptFailure::Malformed(format!("unusable price ratio {price_in}/{price_out}")));
        }

        Ok(QuoteResult {
            input_mint: params.input_mint.clone(),
            output_mint: params.output_mint.clone(),
            in_amount: params.amount.to_string(),
            out_amount: (out_base as u64).to_string(),
            price_impact_pct: Value::from(0),
            route_plan: vec![],
            slippage_bps: params.slippage_bps,
            fetched_at: Utc::now(),
            approximate: true,
            source: price_url.to_string(),
            raw: Value::Null,
        })
    }
}

#[async_trait]
impl QuoteSource for JupiterClient {
    async fn fetch_quote(&self, params: &QuoteParams) -> Result<QuoteResult, QuoteError> {
        self.quote(params).await
    }
}

#[async_trait]
impl SwapBuilder for JupiterClient {
    async fn build_swap_transaction(
        &self,
        quote: &QuoteResult,
        wallet_address: &str,
    ) -> Result<SwapTransaction, SwapBuildError> {
        self.swap(quote, wallet_address).await
    }
}

fn parse_quote(body: Value, params: &QuoteParams, source: &str) -> Result<QuoteResult, AttemptFailure> {
    let fields: QuoteFields =
        serde_json::from_value(body.clone()).map_err(|e| AttemptFailure::Malformed(e.to_string()))?;
    if fields.in_amount.parse::<u64>().is_err() {
        return Err(AttemptFailure::Malformed(format!("inAmount {:?}", fields.in_amount)));
    }
    if fields.out_amount.parse::<u64>().is_err() {
        return Err(AttemptFailure::Malformed(format!("outAmount {:?}", fields.out_amount)));
    }

    let route_plan = fields
        .route_plan
        .into_iter()
        .map(|r| RouteStep {
            label: r.swap_info.label,
            input_mint: r.swap_info.input_mint,
            output_mint: r.swap_info.output_mint,
            percent: r.percent,
        })
        .collect();

    Ok(QuoteResult {
        input_mint: fields.input_mint,
        output_mint: fields.output_mint,
        in_amount: fields.in_amount,
        out_amount: fields.out_amount,
        price_impact_pct: fields.price_impact_pct,
        route_plan,
        slippage_bps: params.slippage_bps,
        fetched_at: Utc::now(),
        approximate: false,
        source: source.to_string(),
        raw: body,
    })
}

fn unit_price(body: &Value, mint: &str) -> Result<f64, AttemptFailure> {
    let price = body
        .get("data")
        .and_then(|d| d.get(mint))
        .and_then(|t| t.get("price"))
        .and_then(|p| match p {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        })
        .filter(|p| p.is_finite() && *p > 0.0);
    price.ok_or_else(|| AttemptFailure::Malformed(format!("no price for {mint}")))
}

/// A definite "no route" answer from any endpoint outranks transport noise from the others.
fn classify_quote_failures(failures: &[AttemptFailure]) -> QuoteError {
    if failures.iter().any(AttemptFailure::is_no_route) {
        return QuoteError::NoRoute;
    }
    QuoteError::UpstreamUnavailable {
        attempts: failures.len(),
        last: failures.last().map(|f| f.to_string()).unwrap_or_else(|| "no endpoint tried".into()),
    }
}

fn classify_transport(e: reqwest::Error) -> AttemptFailure {
    if e.is_timeout() {
        AttemptFailure::Timeout
    } else {
        AttemptFailure::Transport(e.to_string())
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(BODY_SNIPPET).collect()
}

pub fn ensure_slippage_bounds(slippage_bps: u16, max_slippage_bps: u16) -> Result<()> {
    if slippage_bps == 0 {
        return Err(anyhow!("slippage_bps cannot be 0"));
    }
    if slippage_bps > max_slippage_bps {
        return Err(anyhow!(
            "slippage_bps ({slippage_bps}) exceeds max_slippage_bps ({max_slippage_bps})"
        ));
    }
    Ok(())
}
