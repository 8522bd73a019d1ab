//! End-to-end sync scenarios against a scripted chain.
//!
//! Each test drives the real engine (recovery, confirmation, walk) over an
//! in-memory or RocksDB ledger and checks the resulting records.

use carver_core::anomaly::{Anomaly, AnomalyList};
use carver_core::constants::{COIN, JOB_BLOCK, LABEL_COINBASE, LABEL_MASTERNODE, LABEL_POS};
use carver_core::error::CarverError;
use carver_core::ledger::{LedgerStore, MemoryLedgerStore};
use carver_core::traits::RunLock;
use carver_core::types::{MovementKey, TxType};
use carver_sync_lib::{
    run_job, EngineOptions, FileLocker, RocksStore, RunOptions, RunOutcome, SyncEngine,
};
use carver_tests::helpers::*;

fn options(block_confirmations: u64) -> EngineOptions {
    EngineOptions {
        block_confirmations,
        ..EngineOptions::default()
    }
}

fn new_engine<S: LedgerStore>(
    store: S,
    chain: ScriptedChain,
    block_confirmations: u64,
) -> SyncEngine<S, ScriptedChain> {
    SyncEngine::new(store, chain, AnomalyList::default(), options(block_confirmations))
}

/// Ledger produced by syncing `chain` from scratch.
async fn fresh_sync(chain: &ScriptedChain, block_confirmations: u64) -> MemoryLedgerStore {
    let mut engine = new_engine(MemoryLedgerStore::new(), chain.clone(), block_confirmations);
    engine.run(RunOptions::default()).await.unwrap();
    engine.into_store()
}

fn plan(miner: usize, transfers: &[(usize, usize, u8)]) -> BlockPlan {
    BlockPlan {
        miner,
        reward: 50,
        transfers: transfers
            .iter()
            .map(|&(spend, to, percent)| TxPlan { spend, to, percent })
            .collect(),
    }
}

/// Ten blocks with a mix of rewards and transfers.
fn busy_chain() -> ScriptedChain {
    let mut builder = ChainBuilder::new();
    builder.blocks(&[
        plan(0, &[]),
        plan(1, &[(0, 2, 40)]),
        plan(2, &[(1, 3, 100), (0, 4, 25)]),
        plan(0, &[(2, 1, 10)]),
        plan(3, &[]),
        plan(4, &[(3, 0, 60), (5, 2, 0)]),
        plan(1, &[(4, 3, 33)]),
        plan(2, &[(0, 1, 75), (2, 4, 50)]),
        plan(3, &[(6, 0, 90)]),
        plan(0, &[(1, 2, 5)]),
    ]);
    builder.into_chain()
}

fn transfer_chain() -> ScriptedChain {
    let mut chain = ScriptedChain::new();
    chain.push_block(vec![coinbase("cb1", &[("A", 50.0)])]);
    chain.push_block(vec![
        empty_coinbase("cb2"),
        transfer("t2", &[("cb1", 0)], &[("B", 30.0), ("A", 20.0)]),
    ]);
    chain
}

#[tokio::test]
async fn plain_transfer() {
    let mut engine = new_engine(MemoryLedgerStore::new(), transfer_chain(), 10);
    let outcome = engine.run(RunOptions::default()).await.unwrap();
    let RunOutcome::Synced { synced, .. } = outcome else {
        panic!("expected a sync, got {outcome:?}");
    };
    assert_eq!(synced.blocks, 2);
    assert_eq!(synced.transactions, 2);
    assert_eq!(synced.empty, 1);

    let store = engine.store();
    let block = store.get_block(2).unwrap().unwrap();
    assert_eq!(block.sequence_end - block.sequence_start, 2);
    assert_eq!((block.tx_count, block.vins_count, block.vouts_count), (2, 2, 3));
    assert!(!block.is_confirmed);
    assert_eq!(store.get_block(1).unwrap().unwrap().prev, "GENESIS");
    assert_eq!(block.prev, "a-1");

    let a = store.get_address("A").unwrap().unwrap();
    assert_eq!(a.balance, 20 * COIN);
    assert_eq!((a.count_in, a.count_out), (1, 1));
    let b = store.get_address("B").unwrap().unwrap();
    assert_eq!(b.balance, 30 * COIN);
    assert_eq!((b.count_in, b.count_out), (1, 0));
    assert_eq!(b.block_height, 2);

    let movement = store
        .get_movement(&MovementKey { block_height: 2, txid: "t2".into() })
        .unwrap()
        .unwrap();
    assert_eq!(movement.tx_type, TxType::Transfer);
    assert_eq!((movement.addresses_in, movement.addresses_out), (1, 2));
    assert_eq!(movement.amount_in, 50 * COIN);

    check_replay_law(store).unwrap();
    check_sequence_law(store).unwrap();
}

#[tokio::test]
async fn stake_reward_moves_balance_not_counts() {
    let mut chain = ScriptedChain::new();
    chain.push_block(vec![coinbase("cb1", &[("S", 100.0)])]);
    chain.push_block(vec![
        empty_coinbase("cb2"),
        stake("st2", ("cb1", 0), ("S", 102.0), ("MNX", 5.0)),
    ]);

    let mut engine = new_engine(MemoryLedgerStore::new(), chain, 10);
    engine.run(RunOptions::default()).await.unwrap();
    let store = engine.store();

    let staker = store.get_address("S").unwrap().unwrap();
    assert_eq!(staker.balance, 102 * COIN);
    assert_eq!((staker.count_in, staker.count_out), (0, 0));
    assert_eq!(staker.value_in, 0);

    let masternode = store.get_address("MNX").unwrap().unwrap();
    assert_eq!(masternode.balance, 5 * COIN);
    assert_eq!(masternode.count_in, 0);

    let pos = store.get_address(LABEL_POS).unwrap().unwrap();
    assert_eq!(pos.balance, -2 * COIN);
    assert_eq!(pos.count_out, 1);
    let mn = store.get_address(LABEL_MASTERNODE).unwrap().unwrap();
    assert_eq!(mn.balance, -5 * COIN);
    assert_eq!(mn.count_out, 1);

    let key = MovementKey { block_height: 2, txid: "st2".into() };
    let movement = store.get_movement(&key).unwrap().unwrap();
    assert_eq!(movement.tx_type, TxType::ProofOfStake);
    assert!(movement.is_reward);
    assert_eq!(movement.block_reward_details, Some(key.clone()));

    let details = store.get_reward_details(&key).unwrap().unwrap();
    assert_eq!(details.split.staker.as_deref(), Some("S"));
    assert_eq!(details.split.staker_reward, 2 * COIN);
    assert_eq!(details.split.masternode.as_deref(), Some("MNX"));
    assert_eq!(details.split.masternode_reward, 5 * COIN);

    check_replay_law(store).unwrap();
}

#[tokio::test]
async fn deny_listed_transaction_is_skipped() {
    let anomalies = AnomalyList::new([Anomaly { height: 2, txid: "t2".into() }]);
    let mut engine = SyncEngine::new(
        MemoryLedgerStore::new(),
        transfer_chain(),
        anomalies,
        options(10),
    );
    engine.run(RunOptions::default()).await.unwrap();
    let store = engine.store();

    assert_eq!(store.get_address("A").unwrap().unwrap().balance, 50 * COIN);
    assert!(store.get_address("B").unwrap().is_none());
    let block = store.get_block(2).unwrap().unwrap();
    assert_eq!(block.movement_count(), 0);
    assert_eq!(block.tx_count, 2);
    assert_eq!((block.vins_count, block.vouts_count), (1, 1));
}

#[tokio::test]
async fn reorg_at_block_three_of_five() {
    let mut chain = ScriptedChain::new();
    chain.push_block(vec![coinbase("cb-a-1", &[("A", 50.0)])]);
    chain.push_block(vec![coinbase("cb-a-2", &[("B", 50.0)])]);
    chain.push_block(vec![
        coinbase("cb-a-3", &[("C", 50.0)]),
        transfer("ta3", &[("cb-a-1", 0)], &[("D", 10.0), ("A", 40.0)]),
    ]);
    chain.push_block(vec![coinbase("cb-a-4", &[("C", 50.0)])]);
    chain.push_block(vec![coinbase("cb-a-5", &[("C", 50.0)])]);

    // Blocks 1 and 2 are deep enough to confirm on ingest; 3..5 are not.
    let mut engine = new_engine(MemoryLedgerStore::new(), chain.clone(), 4);
    engine.run(RunOptions::default()).await.unwrap();
    assert!(engine.store().get_block(2).unwrap().unwrap().is_confirmed);
    assert!(!engine.store().get_block(3).unwrap().unwrap().is_confirmed);
    assert!(engine.store().get_address("D").unwrap().is_some());

    chain.fork_at(3, "b");
    chain.push_block(vec![
        coinbase("cb-b-3", &[("E", 50.0)]),
        transfer("tb3", &[("cb-a-1", 0)], &[("B", 10.0), ("A", 40.0)]),
    ]);
    for height in 4..=7 {
        chain.push_block(vec![coinbase(&format!("cb-b-{height}"), &[("E", 50.0)])]);
    }
    *engine.chain_mut() = chain.clone();

    let outcome = engine.run(RunOptions::default()).await.unwrap();
    let RunOutcome::Synced { confirmed, synced, .. } = outcome else {
        panic!("expected a sync, got {outcome:?}");
    };
    assert_eq!(confirmed.rolled_back, 3);
    assert_eq!(confirmed.reorg_height, Some(3));
    assert_eq!((synced.from_height, synced.to_height), (3, 7));

    let store = engine.store();
    assert!(store.get_address("D").unwrap().is_none());
    assert_eq!(store.get_address("A").unwrap().unwrap().balance, 40 * COIN);
    assert_eq!(store.get_address("B").unwrap().unwrap().balance, 60 * COIN);
    assert_eq!(store.get_block(3).unwrap().unwrap().hash, "b-3");
    assert_eq!(store.get_block(1).unwrap().unwrap().hash, "a-1");
    check_replay_law(store).unwrap();
    check_sequence_law(store).unwrap();

    let fresh = fresh_sync(&chain, 4).await;
    assert_eq!(normalized(store), normalized(&fresh));
}

#[tokio::test]
async fn crash_before_block_record_is_recovered() {
    let chain = busy_chain();
    let faulty = FaultyStore::new(MemoryLedgerStore::new(), Fault::PutBlock(8));
    let mut engine = new_engine(faulty, chain.clone(), 100);

    let err = engine.run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, CarverError::Storage(_)));
    let residue = engine.into_store().into_inner();
    assert_eq!(residue.highest_block().unwrap().unwrap().height, 7);
    assert_eq!(residue.last_utxo_height().unwrap(), Some(8));

    // Restart on the residue.
    let mut engine = new_engine(residue, chain.clone(), 100);
    let outcome = engine.run(RunOptions::default()).await.unwrap();
    let RunOutcome::Synced { recovered, synced, .. } = outcome else {
        panic!("expected a sync, got {outcome:?}");
    };
    let recovered = recovered.expect("residue should have been rolled back");
    assert_eq!(recovered.blocks, 0);
    assert!(recovered.utxos > 0);
    assert!(recovered.address_movements > 0);
    assert_eq!(synced.from_height, 8);

    check_replay_law(engine.store()).unwrap();
    check_sequence_law(engine.store()).unwrap();
    assert_eq!(normalized(engine.store()), normalized(&fresh_sync(&chain, 100).await));
}

#[tokio::test]
async fn crash_between_movements_and_addresses_is_recovered() {
    let chain = busy_chain();
    let faulty = FaultyStore::new(
        MemoryLedgerStore::new(),
        Fault::AddressesAfterMovementsAt(8),
    );
    let mut engine = new_engine(faulty, chain.clone(), 100);
    assert!(engine.run(RunOptions::default()).await.is_err());

    let residue = engine.into_store().into_inner();
    let mut engine = new_engine(residue, chain.clone(), 100);
    let outcome = engine.run(RunOptions::default()).await.unwrap();
    let RunOutcome::Synced { recovered, .. } = outcome else {
        panic!("expected a sync, got {outcome:?}");
    };
    let recovered = recovered.expect("residue should have been rolled back");
    assert!(recovered.skipped_movements > 0);
    assert_eq!(recovered.address_movements, 0);

    check_replay_law(engine.store()).unwrap();
    assert_eq!(normalized(engine.store()), normalized(&fresh_sync(&chain, 100).await));
}

#[tokio::test]
async fn rollback_interrupted_before_address_cleanup_is_recovered() {
    let chain = busy_chain();
    let mut engine = new_engine(MemoryLedgerStore::new(), chain.clone(), 3);
    engine.run(RunOptions::default()).await.unwrap();
    let late = engine
        .store()
        .all_addresses()
        .unwrap()
        .iter()
        .filter(|a| a.block_height >= 3)
        .count() as u64;
    assert!(late > 0);

    let faulty = FaultyStore::new(engine.into_store(), Fault::DeleteAddressesFrom(3));
    let mut engine = new_engine(faulty, chain.clone(), 3);
    let err = engine
        .run(RunOptions { undo_height: Some(3), tip_height: None })
        .await
        .unwrap_err();
    assert!(matches!(err, CarverError::Storage(_)));

    let residue = engine.into_store().into_inner();
    assert_eq!(residue.highest_block().unwrap().unwrap().height, 2);
    assert!(residue.last_address_height().unwrap().is_some_and(|h| h >= 3));

    let mut engine = new_engine(residue, chain.clone(), 3);
    let outcome = engine.run(RunOptions::default()).await.unwrap();
    let RunOutcome::Synced { recovered, synced, .. } = outcome else {
        panic!("expected a sync, got {outcome:?}");
    };
    let recovered = recovered.expect("stale addresses should have been rolled back");
    assert_eq!(recovered.blocks, 0);
    assert_eq!(recovered.address_movements, 0);
    assert_eq!(recovered.addresses, late);
    assert_eq!(synced.from_height, 3);

    check_replay_law(engine.store()).unwrap();
    check_sequence_law(engine.store()).unwrap();
    assert_eq!(normalized(engine.store()), normalized(&fresh_sync(&chain, 3).await));
}

#[tokio::test]
async fn maintenance_undo_then_resync() {
    let chain = busy_chain();
    let mut engine = new_engine(MemoryLedgerStore::new(), chain.clone(), 3);
    engine.run(RunOptions::default()).await.unwrap();
    let full = normalized(engine.store());

    let outcome = engine
        .run(RunOptions { undo_height: Some(4), tip_height: None })
        .await
        .unwrap();
    let RunOutcome::Undone(summary) = outcome else {
        panic!("expected an undo, got {outcome:?}");
    };
    assert_eq!(summary.blocks, 7);
    assert_eq!(engine.store().highest_block().unwrap().unwrap().height, 3);
    assert!(engine.cache().is_empty());

    let mut pinned = new_engine(MemoryLedgerStore::new(), chain.clone(), 3);
    pinned
        .run(RunOptions { undo_height: None, tip_height: Some(3) })
        .await
        .unwrap();
    assert_eq!(normalized(engine.store()), normalized(pinned.store()));

    engine.run(RunOptions::default()).await.unwrap();
    assert_eq!(normalized(engine.store()), full);
}

#[tokio::test]
async fn up_to_date_ledger_does_nothing() {
    let mut engine = new_engine(MemoryLedgerStore::new(), transfer_chain(), 10);
    engine.run(RunOptions::default()).await.unwrap();
    let before = engine.store().clone();

    let outcome = engine.run(RunOptions::default()).await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::UpToDate { db_height: 2, rpc_height: 2, recovered: None, .. }
    ));
    assert_eq!(engine.store(), &before);
}

#[tokio::test]
async fn confirmations_catch_up_as_chain_grows() {
    let mut builder = ChainBuilder::new();
    builder.blocks(&[plan(0, &[]), plan(1, &[]), plan(2, &[(0, 3, 50)])]);
    let mut engine = new_engine(MemoryLedgerStore::new(), builder.chain().clone(), 3);
    engine.run(RunOptions::default()).await.unwrap();
    assert!(engine.store().get_block(1).unwrap().unwrap().is_confirmed);
    assert!(!engine.store().get_block(2).unwrap().unwrap().is_confirmed);

    builder.blocks(&[plan(3, &[]), plan(4, &[])]);
    *engine.chain_mut() = builder.chain().clone();
    let outcome = engine.run(RunOptions::default()).await.unwrap();
    let RunOutcome::Synced { confirmed, .. } = outcome else {
        panic!("expected a sync, got {outcome:?}");
    };
    assert_eq!(confirmed.confirmed, 2);
    assert_eq!(confirmed.rolled_back, 0);
    assert!(engine.store().get_block(3).unwrap().unwrap().is_confirmed);
}

#[tokio::test]
async fn lock_contention_exits_with_two() {
    let dir = tempfile::tempdir().unwrap();
    let locks = dir.path().join("locks");
    let ledger = dir.path().join("ledger");

    // A running job holds both the run lock and the RocksDB directory.
    let mut holder = FileLocker::new(&locks);
    holder.lock(JOB_BLOCK).unwrap();
    let running = RocksStore::open(&ledger).unwrap();

    let mut contender = FileLocker::new(&locks);
    let code = run_job(
        &mut contender,
        || Ok(new_engine(RocksStore::open(&ledger)?, transfer_chain(), 10)),
        RunOptions::default(),
    )
    .await;
    assert_eq!(code, 2);
    assert!(running.highest_block().unwrap().is_none());

    drop(running);
    holder.unlock(JOB_BLOCK).unwrap();
    let code = run_job(
        &mut contender,
        || Ok(new_engine(RocksStore::open(&ledger)?, transfer_chain(), 10)),
        RunOptions::default(),
    )
    .await;
    assert_eq!(code, 0);
    assert!(!contender.is_held(JOB_BLOCK));

    let store = RocksStore::open(&ledger).unwrap();
    assert_eq!(store.highest_block().unwrap().unwrap().height, 2);
}

#[tokio::test]
async fn rocks_store_matches_memory_store() {
    let chain = busy_chain();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger");

    {
        let mut engine = new_engine(RocksStore::open(&path).unwrap(), chain.clone(), 3);
        engine.run(RunOptions::default()).await.unwrap();
        engine.into_store().flush().unwrap();
    }

    let rocks = RocksStore::open(&path).unwrap();
    let memory = fresh_sync(&chain, 3).await;
    assert_eq!(rocks.all_addresses().unwrap(), memory.all_addresses().unwrap());
    assert_eq!(address_movements(&rocks), address_movements(&memory));
    assert_eq!(rocks.highest_block().unwrap(), memory.highest_block().unwrap());
    assert_eq!(
        rocks.last_confirmed_block().unwrap(),
        memory.last_confirmed_block().unwrap()
    );
    check_replay_law(&rocks).unwrap();
    check_sequence_law(&rocks).unwrap();

    let mut engine = new_engine(rocks, chain, 3);
    let outcome = engine.run(RunOptions::default()).await.unwrap();
    assert!(matches!(outcome, RunOutcome::UpToDate { db_height: 10, .. }));
    assert_eq!(engine.store().get_address(LABEL_COINBASE).unwrap().unwrap().balance, -500 * COIN);
}
