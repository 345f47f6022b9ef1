//! Funding the deploying signer on local networks.
//!
//! Local nodes (hardhat, anvil) expose pre-funded unlocked accounts. The first
//! one sends test ether to the resolved signer so gas never blocks the run.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, U256, utils::format_ether};
use anyhow::{Context, Result};
use url::Url;

use crate::{rpc::RpcClient, tx::TxRequest};

/// Network names treated as local test networks.
pub const LOCAL_NETWORKS: &[&str] = &["hardhat", "localhost", "anvil"];

/// Whether `network` names a local test network.
pub fn is_local_network(network: &str) -> bool {
    LOCAL_NETWORKS.contains(&network)
}

/// Result of a funding transfer.
#[derive(Debug)]
pub struct FundingResult {
    pub funder: Address,
    pub tx_hash: B256,
    pub balance: U256,
}

/// Sends test ether from a node-managed account.
#[derive(Debug, Clone)]
pub struct LocalFunder {
    rpc: RpcClient,
    amount: U256,
    confirmation_timeout: Duration,
}

impl LocalFunder {
    pub fn new(rpc_url: Url, amount: U256, confirmation_timeout: Duration) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(rpc_url)?,
            amount,
            confirmation_timeout,
        })
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    /// Transfer the configured amount to `to` and wait for inclusion.
    pub async fn fund(&self, to: Address) -> Result<FundingResult> {
        let funder = self
            .rpc
            .accounts()
            .await
            .context("Failed to list node accounts")?
            .into_iter()
            .next()
            .context("The node exposes no unlocked account to fund the signer from")?;

        let tx = TxRequest::transfer(to, self.amount);
        let tx_hash: B256 = self
            .rpc
            .call("eth_sendTransaction", vec![tx.to_rpc_object(funder, None)])
            .await
            .context("Failed to send funding transaction")?;

        tracing::info!(
            funder = %funder,
            to = %to,
            amount = %format_ether(self.amount),
            tx_hash = %tx_hash,
            "Funding signer from test account"
        );

        self.rpc
            .wait_for_receipt(tx_hash, self.confirmation_timeout)
            .await
            .context("Funding transaction was not confirmed")?;

        let balance = self.rpc.balance(to).await?;

        Ok(FundingResult {
            funder,
            tx_hash,
            balance,
        })
    }
}
