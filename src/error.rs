use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),
}

/// Why a single aggregator endpoint attempt did not produce a usable body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    #[error("http status {status}")]
    Status { status: u16, body: String },

    #[error("non-json response: {0}")]
    NonJson(String),

    #[error("aggregator error {code}: {message}")]
    Application { code: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

impl AttemptFailure {
    /// The aggregator answered and said there is no liquidity path.
    pub fn is_no_route(&self) -> bool {
        let haystack = match self {
            AttemptFailure::Application { code, message } => format!("{code} {message}"),
            AttemptFailure::Status { status, body } if *status == 400 || *status == 404 => body.clone(),
            _ => return false,
        };
        let h = haystack.to_ascii_uppercase();
        h.contains("COULD_NOT_FIND_ANY_ROUTE")
            || h.contains("NO_ROUTES_FOUND")
            || h.contains("NO ROUTE")
            || h.contains("ROUTE NOT FOUND")
            || h.contains("TOKEN_NOT_TRADABLE")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("invalid amount")]
    InvalidAmount,

    #[error("quotes are available on mainnet only")]
    NetworkUnsupported,

    #[error("no route available for this pair/size")]
    NoRoute,

    #[error("aggregator unavailable after {attempts} attempt(s): {last}")]
    UpstreamUnavailable { attempts: usize, last: String },
}

impl QuoteError {
    /// Transient errors are retried silently on the next debounce cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuoteError::UpstreamUnavailable { .. })
    }
}

impl From<UnitError> for QuoteError {
    fn from(_: UnitError) -> Self {
        QuoteError::InvalidAmount
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwapBuildError {
    #[error("swap response is missing the transaction payload")]
    MissingPayload,

    #[error("swap build failed after {attempts} attempt(s): {last}")]
    Upstream { attempts: usize, last: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("user rejected the signature request")]
    UserRejected,

    #[error("wallet not connected")]
    NotConnected,

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Whether funds may have moved when an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsOutcome {
    NotMoved,
    Unknown,
    Moved,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("an execution is already in progress")]
    Busy,

    #[error("wallet is not connected")]
    WalletNotConnected,

    #[error("no quote available")]
    NoQuote,

    #[error("quote is {age_secs}s old; request a fresh quote")]
    StaleQuote { age_secs: i64 },

    #[error("quote is an approximate price estimate and cannot be executed")]
    ApproximateQuote,

    #[error("swaps are available on mainnet only")]
    NetworkUnsupported,

    #[error("failed to build swap transaction: {0}")]
    BuildFailed(#[from] SwapBuildError),

    #[error("transaction cancelled by user")]
    UserRejectedSignature,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("broadcast of {signature} failed ({reason}); outcome unknown, check explorer")]
    BroadcastFailed { signature: String, reason: String },

    #[error("confirmation of {signature} timed out; outcome unknown, check explorer")]
    ConfirmationTimeout { signature: String },

    #[error("transaction {signature} failed on-chain: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("swap {signature} confirmed but the trade record was not saved: {reason}")]
    PersistenceFailed { signature: String, reason: String },
}

impl ExecutionError {
    pub fn funds_outcome(&self) -> FundsOutcome {
        match self {
            ExecutionError::BroadcastFailed { .. } | ExecutionError::ConfirmationTimeout { .. } => {
                FundsOutcome::Unknown
            }
            ExecutionError::PersistenceFailed { .. } => FundsOutcome::Moved,
            _ => FundsOutcome::NotMoved,
        }
    }

    /// Expected cancellation path, not an error for telemetry purposes.
    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, ExecutionError::UserRejectedSignature)
    }

    /// Signature of the transaction this error refers to, once one exists.
    pub fn signature(&self) -> Option<&str> {
        match self {
            ExecutionError::BroadcastFailed { signature, .. }
            | ExecutionError::ConfirmationTimeout { signature }
            | ExecutionError::TransactionFailed { signature, .. }
            | ExecutionError::PersistenceFailed { signature, .. } => Some(signature),
            _ => None,
        }
    }
}
