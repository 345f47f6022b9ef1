//! In-process key signer.

use std::time::Duration;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use anyhow::{Context, Result};
use url::Url;

use super::Signer;
use crate::{
    rpc::RpcClient,
    tx::{TxReceipt, TxRequest},
};

/// Priority fee used when the node does not implement `eth_maxPriorityFeePerGas`.
const FALLBACK_PRIORITY_FEE: u128 = 1_000_000_000;

/// Gas estimates are padded by this percentage.
const GAS_LIMIT_MARGIN_PERCENT: u64 = 20;

/// Signs EIP-1559 transactions with a key held in memory and broadcasts them
/// with `eth_sendRawTransaction`.
#[derive(Debug)]
pub struct LocalKeySigner {
    key: PrivateKeySigner,
    rpc: RpcClient,
    confirmation_timeout: Duration,
}

impl LocalKeySigner {
    pub fn new(key: PrivateKeySigner, rpc_url: Url, confirmation_timeout: Duration) -> Result<Self> {
        Ok(Self {
            key,
            rpc: RpcClient::new(rpc_url)?,
            confirmation_timeout,
        })
    }

    /// Signer from a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(key: &str, rpc_url: Url, confirmation_timeout: Duration) -> Result<Self> {
        let key: PrivateKeySigner = key
            .trim()
            .parse()
            .context("Failed to parse the local signer private key")?;
        Self::new(key, rpc_url, confirmation_timeout)
    }

    /// Signer derived from a BIP-39 mnemonic at `m/44'/60'/0'/0/<index>`.
    pub fn from_mnemonic(
        phrase: &str,
        index: u32,
        rpc_url: Url,
        confirmation_timeout: Duration,
    ) -> Result<Self> {
        let key = MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(index)
            .context("Invalid mnemonic derivation index")?
            .build()
            .context("Failed to derive the local signer from the mnemonic")?;
        Self::new(key, rpc_url, confirmation_timeout)
    }

    /// Fill nonce, fees and gas, then sign.
    async fn build_signed(&self, tx: &TxRequest) -> Result<TxEnvelope> {
        let from = self.key.address();
        let chain_id = self.rpc.chain_id().await?;
        let nonce = self.rpc.pending_nonce(from).await?;
        let gas_price = self.rpc.gas_price().await?;
        let priority = match self.rpc.max_priority_fee().await {
            Ok(fee) => fee,
            Err(e) => {
                tracing::debug!(error = %e, "Node has no priority fee oracle, using fallback");
                FALLBACK_PRIORITY_FEE
            }
        };
        let max_fee_per_gas = gas_price.saturating_mul(2).max(priority);
        let estimate = self
            .rpc
            .estimate_gas(from, tx)
            .await
            .context("Gas estimation failed (the transaction would revert?)")?;
        let gas_limit = estimate + estimate * GAS_LIMIT_MARGIN_PERCENT / 100;

        let unsigned = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: priority.min(max_fee_per_gas),
            to: tx.to.map(TxKind::Call).unwrap_or(TxKind::Create),
            value: tx.value,
            access_list: Default::default(),
            input: tx.data.clone(),
        };

        let signature = self
            .key
            .sign_hash_sync(&unsigned.signature_hash())
            .context("Failed to sign transaction")?;

        Ok(TxEnvelope::Eip1559(unsigned.into_signed(signature)))
    }
}

impl Signer for LocalKeySigner {
    async fn address(&self) -> Result<Address> {
        Ok(self.key.address())
    }

    async fn chain_id(&self) -> Result<u64> {
        self.rpc
            .chain_id()
            .await
            .with_context(|| format!("Failed to read the chain id from {}", self.rpc.url()))
    }

    async fn balance(&self) -> Result<U256> {
        self.rpc.balance(self.key.address()).await
    }

    async fn sign_and_send(&self, tx: TxRequest) -> Result<B256> {
        let envelope = self.build_signed(&tx).await?;
        let raw: Bytes = envelope.encoded_2718().into();
        let hash: B256 = self
            .rpc
            .call("eth_sendRawTransaction", vec![serde_json::json!(raw)])
            .await
            .context("Network rejected the transaction")?;

        if hash != *envelope.tx_hash() {
            tracing::warn!(
                node_hash = %hash,
                local_hash = %envelope.tx_hash(),
                "Node returned a different transaction hash"
            );
        }
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt> {
        self.rpc
            .wait_for_receipt(hash, self.confirmation_timeout)
            .await
    }
}
