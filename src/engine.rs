//! Orchestrator for the watch-only indexing flow:
//! 1) reconcile a baseline from the node's UTXO-set scan,
//! 2) poll for freshly mined blocks and fold matching outputs into the index,
//! 3) hand concurrent readers snapshot access through the shared [`UtxoIndex`].
use crate::extract::extract_address;
use crate::index::{TxRecord, Utxo, UtxoIndex};
use crate::node::{NodeSource, ScannedUtxo};
use anyhow::Context;
use bitcoin::{Address, Network, OutPoint, Transaction, Txid};
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default delay between monitor polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Core engine. `N` = node source (JSON-RPC in production, a scripted fake in
/// tests). The watch-list and network are per-instance configuration, so
/// several independent engines can coexist in one process.
pub struct Vigia<N> {
    node: N,
    network: Network,
    watchlist: HashSet<Address>,
    index: Arc<UtxoIndex>,
    poll_interval: Duration,
}

impl<N> Vigia<N>
where
    N: NodeSource + 'static,
{
    /// Create an engine watching `watchlist` on `network`, backed by `node`.
    /// The index starts empty; call [`reconcile`](Self::reconcile) before
    /// [`run`](Self::run).
    pub fn new(node: N, network: Network, watchlist: Vec<Address>) -> Self {
        Self {
            node,
            network,
            watchlist: watchlist.into_iter().collect(),
            index: Arc::new(UtxoIndex::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the monitor poll interval (default 10s).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Shared handle to the index. Readers may call its snapshot accessors
    /// concurrently with either indexing phase.
    pub fn index(&self) -> Arc<UtxoIndex> {
        Arc::clone(&self.index)
    }

    /// Build the baseline: ask the node for every current unspent output
    /// matching the watch-list, record each one, and backfill transaction
    /// metadata. Leaves the index height at the larger of the scan's
    /// reference height and any height discovered while resolving.
    ///
    /// # Errors
    /// Only a failure of the top-level scan call aborts. A single entry that
    /// fails to decode or resolve is logged and skipped — the UTXO itself is
    /// still recorded when only the metadata resolution failed.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let descriptors: Vec<String> = self
            .watchlist
            .iter()
            .map(|a| format!("addr({a})"))
            .collect();

        let snapshot = self
            .node
            .scan_unspent(&descriptors)
            .await
            .context("utxo set scan")?;
        info!(
            "scan found {} unspent outputs at height {}",
            snapshot.unspents.len(),
            snapshot.height
        );

        for entry in &snapshot.unspents {
            let Some(address) = extract_address(&entry.script_pubkey, self.network) else {
                warn!(
                    "skipping unspent {}:{}: nonstandard script",
                    entry.txid, entry.vout
                );
                continue;
            };
            info!("found utxo for {address}: {} sat", entry.amount.to_sat());

            self.index.record_utxo(
                address,
                Utxo {
                    outpoint: OutPoint {
                        txid: entry.txid,
                        vout: entry.vout,
                    },
                    amount: entry.amount,
                    script_pubkey: entry.script_pubkey.clone(),
                    height: entry.height,
                    spent: false,
                },
            );

            match self.resolve_transaction(entry).await {
                Ok((record, height)) => {
                    self.index.record_transaction(record);
                    self.index.advance_height(height);
                }
                Err(e) => warn!("no transaction metadata for {}: {e:#}", entry.txid),
            }
        }

        self.index.advance_height(snapshot.height);
        Ok(())
    }

    /// Two-path transaction resolution. The direct lookup covers mempool and
    /// recently seen transactions; anything older the node refuses to serve,
    /// but the containing block — reachable through the UTXO's own
    /// confirmation height — is authoritative once confirmed.
    async fn resolve_transaction(&self, entry: &ScannedUtxo) -> anyhow::Result<(TxRecord, u64)> {
        if let Some(summary) = self.node.raw_transaction(entry.txid).await? {
            let height = match summary.block_hash {
                Some(hash) => self
                    .node
                    .header_height(hash)
                    .await
                    .with_context(|| format!("header height for {hash}"))?,
                None => 0,
            };
            let record = TxRecord {
                txid: summary.txid,
                block_hash: summary.block_hash,
                inputs: vec![],
                outputs: vec![],
            };
            return Ok((record, height));
        }

        anyhow::ensure!(
            entry.height > 0,
            "transaction {} is unconfirmed and unknown to the node",
            entry.txid
        );

        let hash = self
            .node
            .hash_at_height(entry.height)
            .await
            .with_context(|| format!("block hash at height {}", entry.height))?;
        let block = self
            .node
            .block_at(hash)
            .await
            .with_context(|| format!("block {hash}"))?;

        let tx = block
            .txdata
            .iter()
            .find(|tx| tx.compute_txid() == entry.txid)
            .with_context(|| format!("transaction {} not in block {hash}", entry.txid))?;

        let record = TxRecord {
            txid: entry.txid,
            block_hash: Some(hash),
            inputs: tx.input.iter().map(|i| i.previous_output).collect(),
            outputs: vec![],
        };
        Ok((record, entry.height))
    }

    /// Run the live block monitor until `shutdown` fires (or its sender is
    /// dropped). Two states: idle between ticks, processing while draining
    /// newly mined blocks. Cancellation is observed at tick boundaries only,
    /// never mid-block. A failed poll is logged; the next tick is the retry.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("monitor poll failed: {e:#}");
                    }
                }
                _ = shutdown.changed() => {
                    info!("monitor stopping at height {}", self.index.current_height());
                    return Ok(());
                }
            }
        }
    }

    /// One monitor cycle: check the node tip and drain every block between
    /// the last indexed height and the tip. Draining the whole range keeps
    /// the index correct after long downtime instead of working off a
    /// backlog one block per tick.
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let tip = self.node.tip_height().await.context("node tip height")?;
        let last = self.index.current_height();
        if tip <= last {
            return Ok(());
        }

        info!("new blocks detected: {last} -> {tip}");
        for height in last + 1..=tip {
            self.process_block(height)
                .await
                .with_context(|| format!("process block {height}"))?;
        }
        Ok(())
    }

    /// Fold one block into the index: a `TxRecord` per transaction, spent
    /// marks for inputs consuming tracked outputs, and a `Utxo` for every
    /// output paying a watched address. The index height advances only after
    /// the block is fully drained, so a failed block is re-processed on the
    /// next tick (all recording operations are idempotent).
    async fn process_block(&self, height: u64) -> anyhow::Result<()> {
        let hash = self.node.hash_at_height(height).await?;
        let block = self.node.block_at(hash).await?;

        for tx in &block.txdata {
            let txid = tx.compute_txid();

            // Inputs first: a transaction can spend an output recorded
            // earlier in this same block.
            for input in &tx.input {
                if self.index.mark_spent(input.previous_output) {
                    info!("output {} spent by {txid}", input.previous_output);
                }
            }

            let matches = self.matching_outputs(tx, txid, height);
            self.index.record_transaction(TxRecord {
                txid,
                block_hash: Some(hash),
                inputs: tx.input.iter().map(|i| i.previous_output).collect(),
                outputs: matches.iter().map(|(_, u)| u.clone()).collect(),
            });

            for (address, utxo) in matches {
                info!(
                    "found utxo for {address} in {}:{} worth {} sat",
                    txid,
                    utxo.outpoint.vout,
                    utxo.amount.to_sat()
                );
                self.index.record_utxo(address, utxo);
            }
        }

        self.index.advance_height(height);
        Ok(())
    }

    /// Outputs of `tx` paying a watched address. Nonstandard scripts simply
    /// do not match.
    fn matching_outputs(&self, tx: &Transaction, txid: Txid, height: u64) -> Vec<(Address, Utxo)> {
        let mut found = Vec::new();
        for (vout, output) in tx.output.iter().enumerate() {
            let Some(address) = extract_address(&output.script_pubkey, self.network) else {
                continue;
            };
            if !self.watchlist.contains(&address) {
                continue;
            }
            found.push((
                address,
                Utxo {
                    outpoint: OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    amount: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    height,
                    spent: false,
                },
            ));
        }
        found
    }
}
