//! Generate a genesis file for a local devnet.
//!
//! Validator `i` uses the deterministic key `NodeKey::from_seed(i)`, so a
//! node started with `--seed i` joins the generated validator set.
//!
//! Usage:
//!   cargo run --example generate_genesis -- [VALIDATORS] > genesis.json

use ibft_consensus::generate_devnet_genesis;

fn main() {
    let validators = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(4);

    // Fixed timestamp for reproducibility
    let genesis = generate_devnet_genesis(validators, 1_703_116_800);
    if let Err(e) = genesis.validate() {
        eprintln!("invalid genesis: {}", e);
        std::process::exit(1);
    }

    println!("{}", serde_json::to_string_pretty(&genesis).unwrap());
}
