//! Criterion benchmarks for carver-core hot paths.
//!
//! Covers: transaction decomposition, address cache resolution, and
//! address movement encoding.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use carver_core::cache::AddressCache;
use carver_core::constants::COIN;
use carver_core::decompose::{decompose, VinUtxos};
use carver_core::ledger::MemoryLedgerStore;
use carver_core::types::{
    CarverAddressMovement, MovementKey, RpcBlock, RpcScriptPubKey, RpcTransaction, RpcVin,
    RpcVout, Utxo,
};

fn sample_block() -> RpcBlock {
    RpcBlock {
        hash: "bench".into(),
        height: 100,
        time: 1_700_000_000,
        bits: "1d00ffff".into(),
        confirmations: 1,
        difficulty: 1.0,
        merkleroot: "m".into(),
        nonce: 0,
        previousblockhash: Some("prev".into()),
        size: 1000,
        tx: vec![],
        version: 1,
    }
}

/// A transfer spending `inputs` outputs of one address into `outputs` payees.
fn sample_transfer(inputs: u32, outputs: u32) -> (RpcTransaction, VinUtxos) {
    let mut utxos = VinUtxos::new();
    let vin = (0..inputs)
        .map(|n| {
            let utxo = Utxo {
                txid: "funding".into(),
                n,
                value: 10 * COIN,
                address: "sender".into(),
                block_height: 1,
            };
            utxos.insert(utxo.label(), utxo);
            RpcVin {
                txid: Some("funding".into()),
                vout: Some(n),
                ..RpcVin::default()
            }
        })
        .collect();
    let vout = (0..outputs)
        .map(|n| RpcVout {
            value: 1.0,
            n,
            script_pub_key: RpcScriptPubKey {
                kind: "pubkeyhash".into(),
                addresses: vec![format!("payee{n}")],
            },
        })
        .collect();
    let tx = RpcTransaction {
        txid: "bench-tx".into(),
        vin,
        vout,
    };
    (tx, utxos)
}

fn bench_decompose(c: &mut Criterion) {
    let block = sample_block();
    let (small, small_utxos) = sample_transfer(1, 2);
    let (large, large_utxos) = sample_transfer(50, 200);

    c.bench_function("decompose_transfer_1x2", |b| {
        b.iter(|| decompose(black_box(&block), black_box(&small), black_box(&small_utxos)))
    });

    c.bench_function("decompose_transfer_50x200", |b| {
        b.iter(|| decompose(black_box(&block), black_box(&large), black_box(&large_utxos)))
    });
}

fn bench_cache_resolve(c: &mut Criterion) {
    let store = MemoryLedgerStore::new();
    let labels: Vec<String> = (0..1000).map(|i| format!("addr{i}")).collect();

    c.bench_function("cache_resolve_1000_labels", |b| {
        b.iter(|| {
            let mut cache = AddressCache::new(500);
            for label in &labels {
                let _ = cache.resolve(black_box(label), 1, &store);
            }
            cache.len_normal()
        })
    });
}

fn bench_movement_encoding(c: &mut Criterion) {
    let movement = CarverAddressMovement {
        sequence: 123_456,
        label: "bXk8a2fGQdWp8wqPcbq3mpoCvHhxkJ4b3F".into(),
        carver_movement: MovementKey {
            block_height: 100,
            txid: "5a3780fa2e28a89044f0a9c3ee197a891e325dda560c5c2de76f12b319935b56".into(),
        },
        amount_in: 12 * COIN,
        amount_out: 0,
        balance: 40 * COIN,
        time: 1_700_000_000,
        block_height: 100,
        is_reward: false,
        previous_address_movement: Some(120_000),
    };
    let encoded = bincode::encode_to_vec(&movement, bincode::config::standard())
        .expect("encode failed");

    c.bench_function("address_movement_encode", |b| {
        b.iter(|| bincode::encode_to_vec(black_box(&movement), bincode::config::standard()))
    });

    c.bench_function("address_movement_decode", |b| {
        b.iter(|| {
            let (decoded, _): (CarverAddressMovement, usize) =
                bincode::decode_from_slice(black_box(&encoded), bincode::config::standard())
                    .expect("decode failed");
            decoded
        })
    });
}

criterion_group!(
    benches,
    bench_decompose,
    bench_cache_resolve,
    bench_movement_encoding,
);
criterion_main!(benches);
