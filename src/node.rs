//! Abstractions for talking to a Bitcoin node (JSON-RPC or anything else).
use async_trait::async_trait;
use bitcoin::{Amount, Block, BlockHash, ScriptBuf, Txid};

/// One unspent output reported by a node-level UTXO-set scan.
#[derive(Debug, Clone)]
pub struct ScannedUtxo {
    /// Creating transaction id.
    pub txid: Txid,
    /// Output index within the creating transaction.
    pub vout: u32,
    /// Output value.
    pub amount: Amount,
    /// The output's locking script.
    pub script_pubkey: ScriptBuf,
    /// Confirmation height of the creating transaction (0 if unconfirmed).
    pub height: u64,
}

/// Result of a UTXO-set scan: the matching outputs plus the chain height the
/// scan ran against.
#[derive(Debug, Clone)]
pub struct ScanSnapshot {
    /// Outputs whose scripts matched the requested descriptors.
    pub unspents: Vec<ScannedUtxo>,
    /// Chain height at the time of the scan.
    pub height: u64,
}

/// What a direct (verbose) transaction lookup tells us.
#[derive(Debug, Clone)]
pub struct TxSummary {
    /// Transaction id.
    pub txid: Txid,
    /// Containing block; `None` while the transaction is mempool-only.
    pub block_hash: Option<BlockHash>,
}

/// Node provider for the indexer.
///
/// One connection, plain request/response: errors come back as errors and are
/// never retried here. No timeouts either — a hung transport stalls only the
/// caller. The engine takes this as a type parameter, so tests substitute a
/// scripted fake without any network access.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Current best block height.
    async fn tip_height(&self) -> anyhow::Result<u64>;

    /// Block hash at an exact height.
    async fn hash_at_height(&self, height: u64) -> anyhow::Result<BlockHash>;

    /// Full decoded block for `block`.
    async fn block_at(&self, block: BlockHash) -> anyhow::Result<Block>;

    /// Direct verbose transaction lookup. Returns `Ok(None)` on a lookup
    /// miss — nodes only serve transactions inside their own mempool/wallet
    /// view, so a miss is expected and the caller falls back to fetching the
    /// containing block.
    async fn raw_transaction(&self, txid: Txid) -> anyhow::Result<Option<TxSummary>>;

    /// Height recorded in the header of `block`.
    async fn header_height(&self, block: BlockHash) -> anyhow::Result<u64>;

    /// Scan the node's current UTXO set for outputs matching `descriptors`
    /// (each an opaque expression such as `addr(...)`).
    async fn scan_unspent(&self, descriptors: &[String]) -> anyhow::Result<ScanSnapshot>;
}
