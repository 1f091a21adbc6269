use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::TransactionStatus;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::ports::{BroadcastOptions, ChainRpc, Commitment, ConfirmationOutcome, SignedTransaction};

const POLL_INTERVAL: Duration = Duration::from_millis(800);

pub struct SolanaRpc {
    rpc: RpcClient,
    poll_interval: Duration,
}

impl SolanaRpc {
    pub fn new(url: String) -> Self {
        let rpc = RpcClient::new_with_commitment(url, CommitmentConfig::confirmed());
        Self { rpc, poll_interval: POLL_INTERVAL }
    }
}

pub fn commitment_config(level: Commitment) -> CommitmentConfig {
    match level {
        Commitment::Processed => CommitmentConfig::processed(),
        Commitment::Confirmed => CommitmentConfig::confirmed(),
        Commitment::Finalized => CommitmentConfig::finalized(),
    }
}

#[async_trait]
impl ChainRpc for SolanaRpc {
    async fn broadcast(&self, tx: &SignedTransaction, opts: BroadcastOptions) -> Result<String> {
        let vtx: VersionedTransaction = bincode::deserialize(&tx.bytes)?;
        let sig = self
            .rpc
            .send_transaction_with_config(
                &vtx,
                RpcSendTransactionConfig {
                    skip_preflight: opts.skip_preflight,
                    preflight_commitment: Some(CommitmentLevel::Processed),
                    max_retries: Some(opts.max_retries),
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await?;
        info!(signature = %sig, skip_preflight = opts.skip_preflight, "rpc.broadcast");
        Ok(sig.to_string())
    }

    /// Polls `getSignatureStatuses` until `level` is reached, the transaction errors, or `timeout` passes.
    async fn await_confirmation(
        &self,
        signature: &str,
        level: Commitment,
        timeout: Duration,
    ) -> Result<ConfirmationOutcome> {
        let sig = Signature::from_str(signature)?;
        let wanted = commitment_config(level);
        let deadline = Instant::now() + timeout;

        loop {
            // A hung status call must not carry the wait past the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Ok(polled) = tokio::time::timeout(remaining, self.rpc.get_signature_statuses(&[sig])).await else {
                debug!(%signature, "rpc.signature_status.deadline");
                return Ok(ConfirmationOutcome::TimedOut);
            };
            match polled {
                Ok(resp) => {
                    let status: Option<TransactionStatus> = resp.value.into_iter().next().flatten();
                    if let Some(status) = status {
                        if let Some(err) = status.err {
                            return Ok(ConfirmationOutcome::Failed(err.to_string()));
                        }
                        if status.satisfies_commitment(wanted) {
                            return Ok(ConfirmationOutcome::Confirmed);
                        }
                    }
                }
                // Transient RPC errors are retried until the deadline.
                Err(e) => debug!(%signature, error = %e, "rpc.signature_status.error"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(ConfirmationOutcome::TimedOut);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
