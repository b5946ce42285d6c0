//! Locking-script → address decoding.
use bitcoin::{Address, Network, Script};

/// Decode the canonical address a locking script pays to, for `network`.
///
/// Recognizes the standard templates (p2pkh, p2sh, and the witness
/// variants). Returns `None` for empty or nonstandard scripts — never an
/// error. Pure: same script + network always yields the same answer. This is
/// the only place network parameters enter the crate.
pub fn extract_address(script: &Script, network: Network) -> Option<Address> {
    if script.is_empty() {
        return None;
    }
    Address::from_script(script, network).ok()
}
