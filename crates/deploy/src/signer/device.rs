//! Delegated signing device reached through a JSON-RPC bridge.
//!
//! The bridge (Frame, Clef, ...) owns the hardware wallet session: it exposes
//! the unlocked account through `eth_accounts`, the network selected on the
//! device through `eth_chainId`, and signs and broadcasts with
//! `eth_sendTransaction` after the operator approves on the device.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use url::Url;

use super::{Signer, SignerError};
use crate::{
    rpc::RpcClient,
    tx::{TxReceipt, TxRequest},
};

/// Device approval can take a while: the operator confirms on the device screen.
const DEVICE_SIGN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct DeviceSigner {
    device: RpcClient,
    chain: RpcClient,
    confirmation_timeout: Duration,
}

impl DeviceSigner {
    pub fn new(device_url: Url, rpc_url: Url, confirmation_timeout: Duration) -> Result<Self> {
        Ok(Self {
            device: RpcClient::with_timeout(device_url, DEVICE_SIGN_TIMEOUT)?,
            chain: RpcClient::new(rpc_url)?,
            confirmation_timeout,
        })
    }
}

impl Signer for DeviceSigner {
    async fn address(&self) -> Result<Address> {
        let accounts = self.device.accounts().await.map_err(|e| {
            tracing::debug!(error = %e, device_url = %self.device.url(), "Device did not return accounts");
            anyhow::Error::from(SignerError::DeviceLocked)
        })?;

        accounts
            .first()
            .copied()
            .ok_or_else(|| SignerError::DeviceLocked.into())
    }

    async fn chain_id(&self) -> Result<u64> {
        self.device.chain_id().await.map_err(|e| {
            tracing::debug!(error = %e, device_url = %self.device.url(), "Device did not return a chain id");
            SignerError::WrongApplication.into()
        })
    }

    async fn balance(&self) -> Result<U256> {
        let address = self.address().await?;
        self.chain.balance(address).await
    }

    async fn sign_and_send(&self, tx: TxRequest) -> Result<B256> {
        let from = self.address().await?;
        let gas = self
            .chain
            .estimate_gas(from, &tx)
            .await
            .context("Gas estimation failed (the transaction would revert?)")?;

        tracing::info!("Confirm the transaction on the signing device...");

        self.device
            .call(
                "eth_sendTransaction",
                vec![tx.to_rpc_object(from, Some(gas + gas / 5))],
            )
            .await
            .context("Signing device refused or failed to send the transaction")
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt> {
        self.chain
            .wait_for_receipt(hash, self.confirmation_timeout)
            .await
    }
}
