//! Signing identities used to authorize deployments and admin calls.
//!
//! Two variants exist, picked by configuration:
//! - [`DeviceSigner`]: a delegated signing device (hardware wallet bridge) reached over JSON-RPC.
//! - [`LocalKeySigner`]: an in-process key, for local and test networks.

mod device;
pub mod funding;
mod local;

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub use device::DeviceSigner;
pub use local::LocalKeySigner;

use crate::tx::{TxReceipt, TxRequest};

/// Default endpoint of a local signing-device bridge (Frame).
pub const DEFAULT_DEVICE_URL: &str = "http://127.0.0.1:1248";

/// Signer preconditions the operator must resolve by hand.
///
/// Kept distinct because the remedies differ: unlocking the device versus
/// reconfiguring it.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signing device is locked: unlock it and retry")]
    DeviceLocked,
    #[error(
        "signing device rejected the request: open the Ethereum application on the device and select the target network"
    )]
    WrongApplication,
    #[error("signer is on chain {actual}, but the plan targets chain {expected}")]
    ChainMismatch { expected: u64, actual: u64 },
}

/// Identity of the deploying account, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    pub address: Address,
    pub chain_id: u64,
    pub balance: U256,
}

/// Capability to authorize and broadcast transactions.
pub trait Signer: Send + Sync {
    /// Address of the signing account.
    fn address(&self) -> impl Future<Output = Result<Address>> + Send;

    /// Chain the signer is configured for.
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Current balance of the signing account, in wei.
    fn balance(&self) -> impl Future<Output = Result<U256>> + Send;

    /// Sign `tx` and hand it to the network. Returns the transaction hash.
    fn sign_and_send(&self, tx: TxRequest) -> impl Future<Output = Result<B256>> + Send;

    /// Block until `hash` is included.
    fn wait_for_receipt(&self, hash: B256) -> impl Future<Output = Result<TxReceipt>> + Send;
}

/// Check that the signer is unlocked and on the expected chain.
///
/// Fails with a [`SignerError`] before anything is sent.
pub async fn resolve_identity<S: Signer>(
    signer: &S,
    expected_chain_id: Option<u64>,
) -> Result<SignerIdentity> {
    let address = signer.address().await?;
    let chain_id = signer.chain_id().await?;

    if let Some(expected) = expected_chain_id {
        if expected != chain_id {
            return Err(SignerError::ChainMismatch {
                expected,
                actual: chain_id,
            }
            .into());
        }
    }

    let balance = signer
        .balance()
        .await
        .context("Failed to read deployer balance")?;

    Ok(SignerIdentity {
        address,
        chain_id,
        balance,
    })
}

/// Which signer variant to use.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SignerKind {
    /// Delegated signing device.
    #[default]
    Device,
    /// In-process private key.
    Local,
}

/// Signer settings, as stored in the deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    pub kind: SignerKind,
    /// Endpoint of the signing device bridge.
    pub device_url: Url,
    /// Hex private key for [`SignerKind::Local`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Mnemonic for [`SignerKind::Local`], used when no private key is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    #[serde(default)]
    pub mnemonic_index: u32,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            kind: SignerKind::default(),
            device_url: Url::parse(DEFAULT_DEVICE_URL).expect("default device url is valid"),
            private_key: None,
            mnemonic: None,
            mnemonic_index: 0,
        }
    }
}

impl SignerConfig {
    /// Copy of the settings without key material, safe to write to disk.
    pub fn redacted(&self) -> Self {
        Self {
            private_key: None,
            mnemonic: None,
            ..self.clone()
        }
    }

    /// Build the configured signer against the chain at `rpc_url`.
    pub fn build(&self, rpc_url: Url, confirmation_timeout: Duration) -> Result<AnySigner> {
        match self.kind {
            SignerKind::Device => Ok(AnySigner::Device(DeviceSigner::new(
                self.device_url.clone(),
                rpc_url,
                confirmation_timeout,
            )?)),
            SignerKind::Local => {
                let signer = match (&self.private_key, &self.mnemonic) {
                    (Some(key), _) => LocalKeySigner::from_private_key(key, rpc_url, confirmation_timeout)?,
                    (None, Some(phrase)) => LocalKeySigner::from_mnemonic(
                        phrase,
                        self.mnemonic_index,
                        rpc_url,
                        confirmation_timeout,
                    )?,
                    (None, None) => anyhow::bail!(
                        "The local signer needs a private key or a mnemonic (FALLOUT_PRIVATE_KEY / FALLOUT_MNEMONIC)"
                    ),
                };
                Ok(AnySigner::Local(signer))
            }
        }
    }
}

/// Signer selected by configuration.
#[derive(Debug)]
pub enum AnySigner {
    Device(DeviceSigner),
    Local(LocalKeySigner),
}

impl Signer for AnySigner {
    async fn address(&self) -> Result<Address> {
        match self {
            AnySigner::Device(s) => s.address().await,
            AnySigner::Local(s) => s.address().await,
        }
    }

    async fn chain_id(&self) -> Result<u64> {
        match self {
            AnySigner::Device(s) => s.chain_id().await,
            AnySigner::Local(s) => s.chain_id().await,
        }
    }

    async fn balance(&self) -> Result<U256> {
        match self {
            AnySigner::Device(s) => s.balance().await,
            AnySigner::Local(s) => s.balance().await,
        }
    }

    async fn sign_and_send(&self, tx: TxRequest) -> Result<B256> {
        match self {
            AnySigner::Device(s) => s.sign_and_send(tx).await,
            AnySigner::Local(s) => s.sign_and_send(tx).await,
        }
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt> {
        match self {
            AnySigner::Device(s) => s.wait_for_receipt(hash).await,
            AnySigner::Local(s) => s.wait_for_receipt(hash).await,
        }
    }
}
