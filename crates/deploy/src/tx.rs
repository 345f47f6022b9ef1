//! Transaction requests and receipts exchanged with the chain.

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An unsigned transaction as the pipeline describes it.
///
/// Nonce, fees and gas are left to the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

impl TxRequest {
    /// A contract-creation transaction carrying `init_code`.
    pub fn create(init_code: Bytes) -> Self {
        Self {
            to: None,
            data: init_code,
            value: U256::ZERO,
        }
    }

    /// A call to an existing contract.
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            value: U256::ZERO,
        }
    }

    /// A plain value transfer.
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            data: Bytes::new(),
            value,
        }
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// JSON object for `eth_sendTransaction` / `eth_estimateGas`.
    pub fn to_rpc_object(&self, from: Address, gas: Option<u64>) -> Value {
        let mut obj = serde_json::json!({
            "from": from,
            "value": self.value,
            "data": self.data,
        });
        if let Some(to) = self.to {
            obj["to"] = serde_json::json!(to);
        }
        if let Some(gas) = gas {
            obj["gas"] = serde_json::json!(format!("0x{gas:x}"));
        }
        obj
    }
}

/// The subset of a transaction receipt the pipeline relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub contract_address: Option<Address>,
    /// `0x1` on success, `0x0` when reverted.
    #[serde(default)]
    pub status: Option<U64>,
    pub block_number: Option<U64>,
    pub gas_used: U64,
    #[serde(default)]
    pub effective_gas_price: Option<U256>,
}

impl TxReceipt {
    /// Pre-Byzantium receipts carry no status; treat them as successful.
    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|s| s == U64::from(1))
    }
}
