//! Bitcoin Core JSON-RPC light client
//!
//! Reads heights, headers and wallet transactions from a Bitcoin Core node
//! and broadcasts anchors as OP_RETURN transactions funded and signed by the
//! node's wallet:
//!
//! ```text
//! createrawtransaction [] {"data": payload}
//!   → fundrawtransaction → signrawtransactionwithwallet → sendrawtransaction
//! ```

use crate::{BridgeError, ExternalTx, LightClient};
use anchorage_core::{BlockHash, Hash256, TxHash};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Bitcoin Core reports unknown wallet transactions with this code
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// Bitcoin Core RPC connection settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinRpcConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BitcoinRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_string(),
            user: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    time: i64,
}

#[derive(Debug, Deserialize)]
struct WalletTransaction {
    #[serde(default)]
    blockheight: Option<u64>,
    #[serde(default)]
    confirmations: i64,
}

#[derive(Debug, Deserialize)]
struct FundedTransaction {
    hex: String,
}

#[derive(Debug, Deserialize)]
struct SignedTransaction {
    hex: String,
    complete: bool,
}

/// Light client backed by a Bitcoin Core node
pub struct BitcoinRpcClient {
    client: reqwest::Client,
    config: BitcoinRpcConfig,
    next_id: AtomicU64,
}

impl BitcoinRpcClient {
    pub fn new(config: BitcoinRpcConfig) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
        let status = response.status();
        let rpc: RpcResponse<T> = response.json().await.map_err(|e| {
            BridgeError::InvalidResponse(format!("{} ({}): {}", method, status, e))
        })?;

        decode_response(method, rpc)
    }

    async fn block_hash_hex(&self, height: u64) -> Result<String, BridgeError> {
        self.call::<String>("getblockhash", json!([height]))
            .await
            .map_err(|e| match e {
                BridgeError::Rpc { .. } => BridgeError::UnknownBlock(height),
                other => other,
            })
    }
}

fn decode_response<T>(method: &str, rpc: RpcResponse<T>) -> Result<T, BridgeError> {
    if let Some(err) = rpc.error {
        debug!("{} failed: {} {}", method, err.code, err.message);
        return Err(BridgeError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    rpc.result
        .ok_or_else(|| BridgeError::InvalidResponse(format!("{}: missing result", method)))
}

fn parse_hash(s: &str) -> Result<Hash256, BridgeError> {
    Hash256::from_hex(s).map_err(|e| BridgeError::InvalidResponse(format!("hash {}: {}", s, e)))
}

#[async_trait]
impl LightClient for BitcoinRpcClient {
    fn name(&self) -> &str {
        "bitcoin-rpc"
    }

    async fn broadcast(&self, tx: ExternalTx) -> Result<TxHash, BridgeError> {
        let tx = ExternalTx::op_return(tx.payload)?;
        let outputs = json!({ "data": hex::encode(&tx.payload) });

        let raw: String = self.call("createrawtransaction", json!([[], outputs])).await?;
        let funded: FundedTransaction = self.call("fundrawtransaction", json!([raw])).await?;
        let signed: SignedTransaction = self
            .call("signrawtransactionwithwallet", json!([funded.hex]))
            .await?;
        if !signed.complete {
            warn!("wallet could not fully sign anchor transaction");
            return Err(BridgeError::TransactionFailed(
                "incomplete wallet signature".to_string(),
            ));
        }

        let txid: String = self.call("sendrawtransaction", json!([signed.hex])).await?;
        debug!("anchor transaction {} sent", txid);
        parse_hash(&txid)
    }

    async fn current_height(&self) -> Result<u64, BridgeError> {
        self.call("getblockcount", json!([])).await
    }

    async fn block_time_at(&self, height: u64) -> Result<i64, BridgeError> {
        let hash = self.block_hash_hex(height).await?;
        let header: BlockHeader = self.call("getblockheader", json!([hash, true])).await?;
        Ok(header.time)
    }

    async fn block_hash_at(&self, height: u64) -> Result<BlockHash, BridgeError> {
        let hash = self.block_hash_hex(height).await?;
        parse_hash(&hash)
    }

    async fn tx_block_height(&self, tx: &TxHash) -> Result<Option<u64>, BridgeError> {
        match self
            .call::<WalletTransaction>("gettransaction", json!([tx.to_hex()]))
            .await
        {
            Ok(wallet_tx) if wallet_tx.confirmations > 0 => Ok(wallet_tx.blockheight),
            Ok(_) => Ok(None),
            Err(BridgeError::Rpc { code, .. }) if code == RPC_INVALID_ADDRESS_OR_KEY => Ok(None),
            Err(e) => Err(e),
        }
    }
}
