//! Walks one envelope from creation to audit against a throwaway sled db.
//!
//! Run with `RUST_LOG=debug cargo run --example lucky` to see every rejection.

use anyhow::Context;
use lucky_envelope::{LuckyService, utils};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    utils::init_tracing("info")?;

    let temp_dir = tempfile::tempdir()?;
    let db = sled::open(temp_dir.path().join("lucky.db"))?;
    let service = LuckyService::new(Arc::new(db));

    let owner = utils::new_uuid_to_bech32("user_")?;
    let room = utils::new_uuid_to_bech32("room_")?;

    let receipt = service
        .create(&owner, &room, 1000, 3)
        .context("failed to create envelope")?;
    println!("created envelope {}", receipt.token);

    for _ in 0..4 {
        let claimant = utils::new_uuid_to_bech32("user_")?;
        match service.claim(&receipt.token, &claimant, &room) {
            Ok(claim) => println!("{claimant} received {}", claim.amount),
            Err(err) => println!("{claimant} got nothing: {err}"),
        }
    }

    if let Err(err) = service.claim(&receipt.token, &owner, &room) {
        println!("owner claim refused: {err}");
    }

    let view = service.lookup(&receipt.token, &owner)?;
    print!("{view}");
    println!("forfeited remainder: {}", view.unclaimed_amount());

    Ok(())
}
