//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, U256};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::tx::{TxReceipt, TxRequest};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts when waiting for a receipt.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    create_client_with_timeout(DEFAULT_TIMEOUT)
}

/// Create an HTTP client whose requests give up after `timeout`.
pub fn create_client_with_timeout(timeout: Duration) -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error from {}: {}",
            method,
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Poll `check_fn` until it yields a value.
///
/// # Arguments
/// * `name` - Name of the awaited condition (for error messages)
/// * `timeout` - Maximum time to wait
/// * `interval` - Delay between two attempts
/// * `check_fn` - Returns `Ok(Some(_))` once the condition holds, `Ok(None)` to keep polling
///
/// Errors from `check_fn` are treated as transient and retried until the timeout.
pub async fn wait_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    interval: Duration,
    check_fn: F,
) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, anyhow::Error>>,
{
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            anyhow::bail!("Timeout waiting for {}", name);
        }

        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                tracing::trace!(target_name = %name, "Not ready yet, retrying...");
            }
            Err(e) => {
                tracing::debug!(error = %e, target_name = %name, "Check failed, retrying...");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Thin typed client over a single JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: Url,
}

impl RpcClient {
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
            url,
        })
    }

    /// Client whose requests may take up to `timeout`.
    pub fn with_timeout(url: Url, timeout: Duration) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client_with_timeout(timeout)?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, anyhow::Error> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }

    pub async fn chain_id(&self) -> Result<u64, anyhow::Error> {
        let id: U256 = self.call("eth_chainId", vec![]).await?;
        u64::try_from(id).context("Chain id does not fit in u64")
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, anyhow::Error> {
        self.call("eth_accounts", vec![]).await
    }

    pub async fn balance(&self, address: Address) -> Result<U256, anyhow::Error> {
        self.call(
            "eth_getBalance",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    pub async fn pending_nonce(&self, address: Address) -> Result<u64, anyhow::Error> {
        let nonce: U256 = self
            .call(
                "eth_getTransactionCount",
                vec![serde_json::json!(address), serde_json::json!("pending")],
            )
            .await?;
        u64::try_from(nonce).context("Nonce does not fit in u64")
    }

    pub async fn gas_price(&self) -> Result<u128, anyhow::Error> {
        let price: U256 = self.call("eth_gasPrice", vec![]).await?;
        u128::try_from(price).context("Gas price does not fit in u128")
    }

    pub async fn max_priority_fee(&self) -> Result<u128, anyhow::Error> {
        let fee: U256 = self.call("eth_maxPriorityFeePerGas", vec![]).await?;
        u128::try_from(fee).context("Priority fee does not fit in u128")
    }

    pub async fn estimate_gas(&self, from: Address, tx: &TxRequest) -> Result<u64, anyhow::Error> {
        let gas: U256 = self
            .call("eth_estimateGas", vec![tx.to_rpc_object(from, None)])
            .await?;
        u64::try_from(gas).context("Gas estimate does not fit in u64")
    }

    pub async fn receipt(&self, hash: B256) -> Result<Option<TxReceipt>, anyhow::Error> {
        self.call("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
    }

    /// Wait until the transaction is included and return its receipt.
    pub async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<TxReceipt, anyhow::Error> {
        tracing::debug!(tx_hash = %hash, "Waiting for transaction receipt...");
        wait_until(
            &format!("receipt of {hash}"),
            timeout,
            DEFAULT_POLL_INTERVAL,
            || self.receipt(hash),
        )
        .await
    }
}
