//! In-memory UTXO/transaction index shared between the indexing writer and
//! concurrent readers.
use bitcoin::{Address, Amount, BlockHash, OutPoint, ScriptBuf, Txid};
use std::collections::HashMap;
use std::sync::RwLock;

/// One tracked output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// `(txid, vout)` — the identity of the output.
    pub outpoint: OutPoint,
    /// Output value in satoshis.
    pub amount: Amount,
    /// The output's locking script.
    pub script_pubkey: ScriptBuf,
    /// Confirmation height at discovery (0 = unconfirmed).
    pub height: u64,
    /// Set once a later transaction is seen spending this output.
    pub spent: bool,
}

/// A transaction that touched the watch-list.
#[derive(Debug, Clone)]
pub struct TxRecord {
    /// Transaction id.
    pub txid: Txid,
    /// Containing block; `None` while mempool-only.
    pub block_hash: Option<BlockHash>,
    /// Outpoints consumed by this transaction.
    pub inputs: Vec<OutPoint>,
    /// Watch-list outputs this transaction created.
    pub outputs: Vec<Utxo>,
}

#[derive(Default)]
struct Inner {
    // Per-address, in insertion order, unique by outpoint.
    utxos: HashMap<Address, Vec<Utxo>>,
    txs: HashMap<Txid, TxRecord>,
    height: u64,
}

/// The shared index: address → UTXOs, txid → transaction, and the last
/// indexed height.
///
/// Created empty, populated once by [`Vigia::reconcile`] and appended to by
/// the monitor for the life of the process. Entries are never removed.
/// Single writer / many readers; the lock is taken per operation and no
/// method ever awaits while holding it, so snapshot reads stay cheap even
/// while the writer is off doing RPC round-trips.
///
/// [`Vigia::reconcile`]: crate::engine::Vigia::reconcile
#[derive(Default)]
pub struct UtxoIndex {
    inner: RwLock<Inner>,
}

impl UtxoIndex {
    /// New empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `utxo` to `address`'s sequence. A re-discovery of an outpoint
    /// already recorded for the address is dropped.
    pub fn record_utxo(&self, address: Address, utxo: Utxo) {
        let mut inner = self.inner.write().unwrap();
        let entries = inner.utxos.entry(address).or_default();
        if entries.iter().any(|u| u.outpoint == utxo.outpoint) {
            return;
        }
        entries.push(utxo);
    }

    /// Upsert by transaction id — last write wins.
    pub fn record_transaction(&self, tx: TxRecord) {
        self.inner.write().unwrap().txs.insert(tx.txid, tx);
    }

    /// Mark the UTXO identified by `outpoint` as spent. Returns whether a
    /// recorded entry matched.
    pub fn mark_spent(&self, outpoint: OutPoint) -> bool {
        let mut inner = self.inner.write().unwrap();
        for entries in inner.utxos.values_mut() {
            if let Some(utxo) = entries.iter_mut().find(|u| u.outpoint == outpoint) {
                utxo.spent = true;
                return true;
            }
        }
        false
    }

    /// Raise the last-indexed height to `height`. Monotonic: stale or
    /// repeated values are no-ops, so callers may report heights out of order.
    pub fn advance_height(&self, height: u64) {
        let mut inner = self.inner.write().unwrap();
        if height > inner.height {
            inner.height = height;
        }
    }

    /// Last indexed block height.
    pub fn current_height(&self) -> u64 {
        self.inner.read().unwrap().height
    }

    /// Snapshot of every recorded UTXO across all addresses, spent ones
    /// included. Order is unspecified and may vary between calls.
    pub fn utxos(&self) -> Vec<Utxo> {
        let inner = self.inner.read().unwrap();
        inner.utxos.values().flatten().cloned().collect()
    }

    /// Snapshot of the UTXOs not yet seen spent.
    pub fn unspent(&self) -> Vec<Utxo> {
        let inner = self.inner.read().unwrap();
        inner
            .utxos
            .values()
            .flatten()
            .filter(|u| !u.spent)
            .cloned()
            .collect()
    }

    /// Snapshot of all recorded transactions. Order is unspecified.
    pub fn transactions(&self) -> Vec<TxRecord> {
        let inner = self.inner.read().unwrap();
        inner.txs.values().cloned().collect()
    }
}
