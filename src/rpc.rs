//! Bitcoin Core JSON-RPC implementation of [`NodeSource`].
use crate::node::{NodeSource, ScanSnapshot, ScannedUtxo, TxSummary};
use anyhow::Context;
use async_trait::async_trait;
use bitcoin::{Block, BlockHash, Txid};
use bitcoincore_rpc::json::ScanTxOutRequest;
use bitcoincore_rpc::{Client, Error as RpcError, RpcApi};

// Re-exported so callers building a `CoreNode` don't need a direct
// bitcoincore-rpc dependency for the credentials type.
pub use bitcoincore_rpc::Auth;

/// A [`NodeSource`] backed by a Bitcoin Core node over JSON-RPC. Framing,
/// authentication, and transport live entirely inside `bitcoincore-rpc`; this
/// is a thin typed shim with no retries and no caching.
pub struct CoreNode {
    client: Client,
}

impl CoreNode {
    /// Connect to the node at `url` with the given credentials.
    pub fn new(url: &str, auth: Auth) -> anyhow::Result<Self> {
        let client = Client::new(url, auth).context("create bitcoin core rpc client")?;
        Ok(Self { client })
    }
}

/// Core answers `getrawtransaction` for unknown transactions with
/// RPC_INVALID_ADDRESS_OR_KEY (-5). That is a lookup miss, not a failure.
fn is_not_found(err: &RpcError) -> bool {
    matches!(
        err,
        RpcError::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Rpc(e)) if e.code == -5
    )
}

#[async_trait]
impl NodeSource for CoreNode {
    async fn tip_height(&self) -> anyhow::Result<u64> {
        Ok(self.client.get_block_count()?)
    }

    async fn hash_at_height(&self, height: u64) -> anyhow::Result<BlockHash> {
        Ok(self.client.get_block_hash(height)?)
    }

    async fn block_at(&self, block: BlockHash) -> anyhow::Result<Block> {
        Ok(self.client.get_block(&block)?)
    }

    async fn raw_transaction(&self, txid: Txid) -> anyhow::Result<Option<TxSummary>> {
        match self.client.get_raw_transaction_info(&txid, None) {
            Ok(info) => Ok(Some(TxSummary {
                txid: info.txid,
                block_hash: info.blockhash,
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn header_height(&self, block: BlockHash) -> anyhow::Result<u64> {
        let header = self.client.get_block_header_info(&block)?;
        Ok(header.height as u64)
    }

    async fn scan_unspent(&self, descriptors: &[String]) -> anyhow::Result<ScanSnapshot> {
        let requests: Vec<ScanTxOutRequest> = descriptors
            .iter()
            .cloned()
            .map(ScanTxOutRequest::Single)
            .collect();

        let result = self
            .client
            .scan_tx_out_set_blocking(&requests)
            .context("scantxoutset")?;
        anyhow::ensure!(
            result.success.unwrap_or(false),
            "utxo set scan did not complete"
        );

        let unspents = result
            .unspents
            .into_iter()
            .map(|u| ScannedUtxo {
                txid: u.txid,
                vout: u.vout,
                amount: u.amount,
                script_pubkey: u.script_pub_key,
                height: u.height,
            })
            .collect();

        Ok(ScanSnapshot {
            unspents,
            height: result.height.unwrap_or(0),
        })
    }
}
