use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use parfor_rs::buffer::{InMemoryStorage, LocalFileStorage, LocalStorage};
use parfor_rs::{BufferPoolConfig, EvictionPolicy, MatrixBlock, ParforError, WriteBufferPool};

fn dense(seed: u32) -> MatrixBlock {
    MatrixBlock::from_fn(8, 8, |r, c| f64::from(seed) * 1000.0 + f64::from(r * 8 + c) + 0.25)
}

fn entry_size() -> u64 {
    dense(0).exact_size_on_disk().expect("dense size")
}

/// Pool holding exactly `entries` dense test blocks.
fn pool_with(
    entries: u64,
    policy: EvictionPolicy,
    storage: Arc<dyn LocalStorage>,
) -> WriteBufferPool {
    let cfg = BufferPoolConfig {
        buffer_fraction: 0.5,
        policy,
        ..BufferPoolConfig::default()
    };
    let pool = WriteBufferPool::new(&cfg, 2 * entries * entry_size(), storage);
    pool.init();
    pool
}

#[test]
fn budget_is_a_fraction_of_local_memory() {
    let cfg = BufferPoolConfig {
        buffer_fraction: 0.15,
        ..BufferPoolConfig::default()
    };
    assert_eq!(WriteBufferPool::write_buffer_size(&cfg, 1000), 150);
}

#[test]
fn fifo_pool_never_exceeds_limit_and_reads_back_exactly() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = pool_with(3, EvictionPolicy::Fifo, storage.clone());

    for seed in 0..10 {
        pool.write(&format!("b{seed}"), &dense(seed)).expect("write");
        assert!(pool.size() <= pool.limit());
    }
    assert_eq!(pool.len(), 3);
    assert_eq!(storage.len(), 7);
    for seed in 0..10 {
        assert_eq!(pool.read(&format!("b{seed}")).expect("read"), dense(seed));
    }

    let stats = pool.statistics().snapshot();
    assert_eq!(stats.buffer_writes, 10);
    assert_eq!(stats.fs_writes, 7);
    assert_eq!(stats.buffer_hits, 3);
    assert_eq!(stats.fs_hits, 7);
}

#[test]
fn lru_keeps_recently_read_entries() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = pool_with(2, EvictionPolicy::Lru, storage.clone());
    pool.write("a", &dense(1)).expect("write a");
    pool.write("b", &dense(2)).expect("write b");
    pool.read("a").expect("read a");
    pool.write("c", &dense(3)).expect("write c");

    assert!(pool.contains("a"));
    assert!(!pool.contains("b"));
    assert!(storage.contains("b"));
}

#[test]
fn fifo_ignores_reads_when_evicting() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = pool_with(2, EvictionPolicy::Fifo, storage.clone());
    pool.write("a", &dense(1)).expect("write a");
    pool.write("b", &dense(2)).expect("write b");
    pool.read("a").expect("read a");
    pool.write("c", &dense(3)).expect("write c");

    assert!(!pool.contains("a"));
    assert!(storage.contains("a"));
    assert!(pool.contains("b"));
}

#[test]
fn oversized_blocks_bypass_the_buffer() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = pool_with(1, EvictionPolicy::Fifo, storage.clone());
    let large = MatrixBlock::from_fn(64, 64, |r, c| f64::from(r + c));

    pool.write("big", &large).expect("bypass write");
    assert!(pool.is_empty());
    assert_eq!(pool.size(), 0);
    assert!(storage.contains("big"));
    assert_eq!(pool.read("big").expect("read big"), large);
    assert_eq!(pool.statistics().snapshot().fs_hits, 1);
}

#[test]
fn sparse_blocks_round_trip_through_eviction() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = pool_with(1, EvictionPolicy::Fifo, storage);
    let sparse = MatrixBlock::sparse(1000, 1000, [(3, 7, 1.5), (999, 0, -2.0), (3, 7, 4.0)]);
    assert_eq!(sparse.nnz(), 2);

    pool.write("s", &sparse).expect("write sparse");
    let status = pool.status().expect("status");
    assert!(status.entries[0].sparse);
    pool.write("d", &dense(1)).expect("write dense");

    let back = pool.read("s").expect("read sparse");
    assert_eq!(back, sparse);
    assert_eq!(back.get(3, 7), 4.0);
    assert_eq!(back.get(0, 0), 0.0);
}

#[test]
fn delete_frees_memory_and_storage() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = pool_with(1, EvictionPolicy::Fifo, storage.clone());
    pool.write("a", &dense(1)).expect("write a");
    pool.write("b", &dense(2)).expect("write b");

    pool.delete("b").expect("delete resident");
    assert_eq!(pool.size(), 0);
    pool.delete("a").expect("delete spilled");
    assert!(storage.is_empty());
    assert!(matches!(pool.read("a"), Err(ParforError::IoFailure { .. })));
    pool.delete("missing").expect("deleting nothing is fine");
}

#[test]
fn file_storage_backs_evicted_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(LocalFileStorage::new(dir.path().join("scratch")).expect("storage"));
    let pool = pool_with(2, EvictionPolicy::Lru, storage);

    for seed in 0..5 {
        pool.write(&format!("blocks/{seed}"), &dense(seed)).expect("write");
    }
    assert!(dir.path().join("scratch/blocks/0").is_file());
    assert!(!dir.path().join("scratch/blocks/4").exists());
    for seed in 0..5 {
        assert_eq!(pool.read(&format!("blocks/{seed}")).expect("read"), dense(seed));
    }

    let large = MatrixBlock::from_fn(64, 64, |r, c| f64::from(r * c));
    let err = pool.write("../escape", &large).expect_err("key escapes scratch");
    assert!(matches!(err, ParforError::IoFailure { .. }));
}

#[test]
fn cleanup_forgets_resident_entries() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = pool_with(4, EvictionPolicy::Fifo, storage.clone());
    pool.write("a", &dense(1)).expect("write a");
    pool.cleanup();

    assert!(!pool.is_initialized());
    assert!(storage.is_empty());
    assert!(matches!(
        pool.write("b", &dense(2)),
        Err(ParforError::ConfigMissing(_))
    ));
    pool.init();
    assert!(pool.is_empty());
}

#[test]
fn concurrent_writers_and_readers_keep_the_budget() {
    let storage = Arc::new(InMemoryStorage::new());
    let pool = Arc::new(pool_with(4, EvictionPolicy::Lru, storage));

    let handles: Vec<_> = (0..4u32)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(u64::from(worker));
                for step in 0..50u32 {
                    let seed = worker * 100 + rng.gen_range(0..10);
                    let key = format!("w{seed}");
                    if step % 3 == 0 {
                        // a miss means the key was never written
                        if let Ok(block) = pool.read(&key) {
                            assert_eq!(block, dense(seed));
                        }
                    } else {
                        pool.write(&key, &dense(seed)).expect("write");
                    }
                    assert!(pool.size() <= pool.limit());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread");
    }
    assert!(pool.len() <= 4);
}
