//! A JSON-RPC node for tests, standing in for a local chain or a signing
//! device bridge.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use alloy_core::primitives::{Address, B256, U64, U256, keccak256};
use fallout_deploy::TxReceipt;
use jsonrpsee::{
    core::RpcResult,
    proc_macros::rpc,
    server::{Server, ServerHandle},
    types::ErrorObjectOwned,
};
use serde_json::Value;
use url::Url;

#[rpc(server, namespace = "eth")]
pub trait StubNodeApi {
    #[method(name = "accounts")]
    fn accounts(&self) -> RpcResult<Vec<Address>>;

    #[method(name = "chainId")]
    fn chain_id(&self) -> RpcResult<U64>;

    #[method(name = "getBalance")]
    fn get_balance(&self, address: Address, block: String) -> RpcResult<U256>;

    #[method(name = "sendTransaction")]
    fn send_transaction(&self, tx: Value) -> RpcResult<B256>;

    #[method(name = "getTransactionReceipt")]
    fn get_transaction_receipt(&self, hash: B256) -> RpcResult<Option<TxReceipt>>;
}

/// Node state. Every address shares `balance`; a sent transaction is mined,
/// and its value credited, the first time its receipt is asked for.
#[derive(Debug, Clone, Default)]
pub struct StubNode {
    /// `None` makes `eth_accounts` fail, as a locked device does.
    pub accounts: Option<Vec<Address>>,
    /// `None` makes `eth_chainId` fail, as a device outside the Ethereum app does.
    pub chain_id: Option<u64>,
    pub balance: Arc<Mutex<U256>>,
    /// Transaction objects received through `eth_sendTransaction`.
    pub sent: Arc<Mutex<Vec<Value>>>,
    pub mined: Arc<Mutex<Vec<B256>>>,
}

impl StubNode {
    /// Serve the node on a free local port.
    ///
    /// The server stops when the returned handle is dropped.
    pub async fn spawn(self) -> (Url, ServerHandle) {
        let server = Server::builder().build("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", server.local_addr().unwrap())).unwrap();
        (url, server.start(self.into_rpc()))
    }
}

fn rpc_error(message: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32000, message.to_string(), None::<()>)
}

fn tx_hash(index: usize) -> B256 {
    keccak256(format!("stub-node-tx-{index}"))
}

impl StubNodeApiServer for StubNode {
    fn accounts(&self) -> RpcResult<Vec<Address>> {
        self.accounts.clone().ok_or_else(|| rpc_error("device is locked"))
    }

    fn chain_id(&self) -> RpcResult<U64> {
        self.chain_id
            .map(U64::from)
            .ok_or_else(|| rpc_error("no Ethereum application open"))
    }

    fn get_balance(&self, _address: Address, _block: String) -> RpcResult<U256> {
        Ok(*self.balance.lock().unwrap())
    }

    fn send_transaction(&self, tx: Value) -> RpcResult<B256> {
        let mut sent = self.sent.lock().unwrap();
        let hash = tx_hash(sent.len());
        sent.push(tx);
        Ok(hash)
    }

    fn get_transaction_receipt(&self, hash: B256) -> RpcResult<Option<TxReceipt>> {
        let sent = self.sent.lock().unwrap();
        let Some(index) = (0..sent.len()).find(|i| tx_hash(*i) == hash) else {
            return Ok(None);
        };

        let mut mined = self.mined.lock().unwrap();
        if !mined.contains(&hash) {
            let value: U256 = serde_json::from_value(sent[index]["value"].clone()).unwrap_or_default();
            let mut balance = self.balance.lock().unwrap();
            *balance += value;
            mined.push(hash);
        }

        Ok(Some(TxReceipt {
            transaction_hash: hash,
            contract_address: None,
            status: Some(U64::from(1)),
            block_number: Some(U64::from(index as u64 + 1)),
            gas_used: U64::from(21_000),
            effective_gas_price: None,
        }))
    }
}
