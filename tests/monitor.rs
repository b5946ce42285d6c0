use anyhow::Context;
use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::{
    absolute::LockTime,
    block::{Header as BlockHeader, Version as BlockVersion},
    hash_types::TxMerkleNode,
    pow::CompactTarget,
    transaction::Version as TxVersion,
    Address, Amount, Block, BlockHash, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, WPubkeyHash, Witness,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use vigia::node::{NodeSource, ScanSnapshot, TxSummary};
use vigia::prelude::*;

/// ------- Growable fake chain, shared between the test and the engine -------
#[derive(Clone, Default)]
struct FakeChain {
    inner: Arc<Mutex<ChainState>>,
}

#[derive(Default)]
struct ChainState {
    tip: u64,
    blocks: HashMap<u64, Block>,
}

impl FakeChain {
    fn mine(&self, height: u64, block: Block) {
        let mut state = self.inner.lock().unwrap();
        state.blocks.insert(height, block);
        state.tip = state.tip.max(height);
    }
}

#[async_trait]
impl NodeSource for FakeChain {
    async fn tip_height(&self) -> anyhow::Result<u64> {
        Ok(self.inner.lock().unwrap().tip)
    }
    async fn hash_at_height(&self, height: u64) -> anyhow::Result<BlockHash> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .get(&height)
            .map(|b| b.block_hash())
            .with_context(|| format!("no block at {height}"))
    }
    async fn block_at(&self, block: BlockHash) -> anyhow::Result<Block> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .values()
            .find(|b| b.block_hash() == block)
            .cloned()
            .context("unknown block")
    }
    async fn raw_transaction(&self, _txid: Txid) -> anyhow::Result<Option<TxSummary>> {
        Ok(None)
    }
    async fn header_height(&self, _block: BlockHash) -> anyhow::Result<u64> {
        anyhow::bail!("not used by the monitor")
    }
    async fn scan_unspent(&self, _descriptors: &[String]) -> anyhow::Result<ScanSnapshot> {
        anyhow::bail!("not used by the monitor")
    }
}

fn watch_pair() -> (ScriptBuf, Address) {
    let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([7u8; 20]));
    let address = Address::from_script(&script, Network::Testnet).expect("standard script");
    (script, address)
}

/// Regtest-shaped header; `nonce` keeps block hashes distinct.
fn make_block(nonce: u32, txs: Vec<Transaction>) -> Block {
    let header = BlockHeader {
        version: BlockVersion::from_consensus(2),
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: TxMerkleNode::all_zeros(),
        time: 0,
        bits: CompactTarget::from_consensus(0x207fffff),
        nonce,
    };
    Block { header, txdata: txs }
}

fn spend(prev: OutPoint, script: &ScriptBuf, sat: u64) -> Transaction {
    Transaction {
        version: TxVersion::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prev,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(sat),
            script_pubkey: script.clone(),
        }],
    }
}

fn coinbase_ish(tag: u8, script: &ScriptBuf, sat: u64) -> Transaction {
    spend(
        OutPoint {
            txid: Txid::from_byte_array([tag; 32]),
            vout: u32::MAX,
        },
        script,
        sat,
    )
}

#[tokio::test]
async fn tick_indexes_one_new_block() -> anyhow::Result<()> {
    let (script, address) = watch_pair();
    let chain = FakeChain::default();
    chain.mine(100, make_block(100, vec![]));

    let engine = Vigia::new(chain.clone(), Network::Testnet, vec![address]);
    let index = engine.index();
    index.advance_height(100);

    // Nothing new yet: the tick is a no-op.
    engine.poll_once().await?;
    assert_eq!(index.current_height(), 100);
    assert!(index.utxos().is_empty());

    // One block arrives with a matching output.
    let tx = coinbase_ish(1, &script, 30_000);
    let txid = tx.compute_txid();
    chain.mine(101, make_block(101, vec![tx]));

    engine.poll_once().await?;
    assert_eq!(index.current_height(), 101);

    let utxos = index.utxos();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].outpoint, OutPoint { txid, vout: 0 });
    assert_eq!(utxos[0].amount, Amount::from_sat(30_000));
    assert_eq!(utxos[0].height, 101);
    Ok(())
}

// Tip climbs 100 -> 103 one block per tick with nothing for us in any of
// them: the height follows, the UTXO set does not move.
#[tokio::test]
async fn empty_blocks_only_advance_height() -> anyhow::Result<()> {
    let (_, address) = watch_pair();
    let chain = FakeChain::default();

    let engine = Vigia::new(chain.clone(), Network::Testnet, vec![address]);
    let index = engine.index();
    index.advance_height(100);

    for height in 101..=103 {
        chain.mine(height, make_block(height as u32, vec![]));
        engine.poll_once().await?;
    }

    assert_eq!(index.current_height(), 103);
    assert!(index.utxos().is_empty());
    Ok(())
}

// One transaction with an addressless output next to one watch-list match:
// exactly one UTXO lands and the poll finishes cleanly.
#[tokio::test]
async fn undecodable_output_does_not_stop_the_block() -> anyhow::Result<()> {
    let (script, address) = watch_pair();
    let junk = ScriptBuf::from_bytes(vec![0x51]);

    let chain = FakeChain::default();
    let block = make_block(
        101,
        vec![coinbase_ish(1, &junk, 1_000), coinbase_ish(2, &script, 2_000)],
    );
    chain.mine(101, block);

    let engine = Vigia::new(chain, Network::Testnet, vec![address]);
    let index = engine.index();
    index.advance_height(100);

    engine.poll_once().await?;
    assert_eq!(index.utxos().len(), 1);
    assert_eq!(index.utxos()[0].amount, Amount::from_sat(2_000));
    assert_eq!(index.current_height(), 101);
    Ok(())
}

// The node was three blocks ahead when the tick fired: the whole missed
// range drains in a single cycle.
#[tokio::test]
async fn backlog_drains_in_one_tick() -> anyhow::Result<()> {
    let (script, address) = watch_pair();
    let chain = FakeChain::default();
    chain.mine(101, make_block(101, vec![]));
    chain.mine(102, make_block(102, vec![coinbase_ish(1, &script, 5_000)]));
    chain.mine(103, make_block(103, vec![]));

    let engine = Vigia::new(chain, Network::Testnet, vec![address]);
    let index = engine.index();
    index.advance_height(100);

    engine.poll_once().await?;
    assert_eq!(index.current_height(), 103);

    let utxos = index.utxos();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].height, 102);
    Ok(())
}

// Block 101 pays us, block 102 spends that output: the entry stays recorded
// but flips to spent, and the spender's inputs are on file.
#[tokio::test]
async fn later_block_marks_output_spent() -> anyhow::Result<()> {
    let (script, address) = watch_pair();
    let other = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([8u8; 20]));

    let funding = coinbase_ish(1, &script, 40_000);
    let funded = OutPoint {
        txid: funding.compute_txid(),
        vout: 0,
    };
    let spender = spend(funded, &other, 39_000);
    let spender_txid = spender.compute_txid();

    let chain = FakeChain::default();
    chain.mine(101, make_block(101, vec![funding]));
    chain.mine(102, make_block(102, vec![spender]));

    let engine = Vigia::new(chain, Network::Testnet, vec![address]);
    let index = engine.index();
    index.advance_height(100);

    engine.poll_once().await?;
    assert_eq!(index.current_height(), 102);

    let utxos = index.utxos();
    assert_eq!(utxos.len(), 1);
    assert!(utxos[0].spent);
    assert!(index.unspent().is_empty());

    let spender_record = index
        .transactions()
        .into_iter()
        .find(|t| t.txid == spender_txid)
        .expect("spender recorded");
    assert_eq!(spender_record.inputs, vec![funded]);
    Ok(())
}

#[tokio::test]
async fn shutdown_signal_stops_the_monitor() -> anyhow::Result<()> {
    let (_, address) = watch_pair();
    let chain = FakeChain::default();

    let engine = Arc::new(
        Vigia::new(chain, Network::Testnet, vec![address])
            .with_poll_interval(Duration::from_millis(5)),
    );

    let (stop, stop_rx) = watch::channel(false);
    let monitor = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(stop_rx).await }
    });

    // Let a few ticks elapse, then cancel.
    tokio::time::sleep(Duration::from_millis(25)).await;
    stop.send(true)?;

    tokio::time::timeout(Duration::from_secs(1), monitor)
        .await
        .expect("monitor exits promptly")??;
    Ok(())
}
