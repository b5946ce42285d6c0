#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! vigia: a watch-only UTXO/transaction indexer for a fixed set of addresses.
//!
//! ## What you implement
//! - [`NodeSource`]: six node calls — tip height, hash-by-height, block fetch,
//!   verbose transaction lookup, header height, and a UTXO-set scan. The
//!   bundled [`CoreNode`] covers Bitcoin Core over JSON-RPC (feature
//!   `client-rpc`, on by default); tests run against scripted fakes.
//!
//! ## What the engine does
//! - **Reconcile**: one full scan of the node's UTXO set against your
//!   watch-list, backfilling transaction metadata per match.
//! - **Monitor**: a cancellable polling task that drains newly mined blocks,
//!   records matching outputs, and marks tracked outputs spent.
//! - **Serve readers**: the in-memory [`UtxoIndex`] hands out consistent
//!   snapshots (`utxos`, `unspent`, `transactions`, `current_height`) to any
//!   number of concurrent readers while the single writer works.
//!
//! Nothing is persisted; the index lives and dies with the process.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use vigia::prelude::*;
//! use bitcoin::Network;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let node = CoreNode::new(
//!         "http://127.0.0.1:48332",
//!         Auth::UserPass("admin".into(), "admin".into()),
//!     )?;
//!     let watchlist = vec![
//!         "muCmmr3fwCvbFbdPUgtw6KFyx92qtDyuyx"
//!             .parse::<bitcoin::Address<_>>()?
//!             .require_network(Network::Testnet)?,
//!     ];
//!
//!     let engine = std::sync::Arc::new(Vigia::new(node, Network::Testnet, watchlist));
//!     let index = engine.index();
//!
//!     // Baseline first, then the live monitor in the background.
//!     engine.reconcile().await?;
//!     let (stop, stop_rx) = tokio::sync::watch::channel(false);
//!     let monitor = tokio::spawn({
//!         let engine = engine.clone();
//!         async move { engine.run(stop_rx).await }
//!     });
//!
//!     // ... later, from anywhere:
//!     println!("{} utxos at height {}", index.utxos().len(), index.current_height());
//!
//!     stop.send(true)?;
//!     monitor.await??;
//!     Ok(())
//! }
//! ```

/// Engine that reconciles a baseline scan and monitors new blocks.
pub mod engine;

/// Locking-script → address decoding.
pub mod extract;

/// The shared in-memory UTXO/transaction index.
pub mod index;

/// Node access abstraction (the six calls the engine needs).
pub mod node;

/// Bitcoin Core JSON-RPC implementation of the node abstraction.
#[cfg(feature = "client-rpc")]
pub mod rpc;

// Public re-exports
pub use engine::Vigia;
pub use extract::extract_address;
pub use index::{TxRecord, Utxo, UtxoIndex};
pub use node::NodeSource;
#[cfg(feature = "client-rpc")]
pub use rpc::{Auth, CoreNode};

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{extract_address, NodeSource, TxRecord, Utxo, UtxoIndex, Vigia};

    #[cfg(feature = "client-rpc")]
    pub use crate::{Auth, CoreNode};
}
