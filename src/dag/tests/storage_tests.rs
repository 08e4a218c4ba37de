//! Integration tests for the RocksDB backed DAG
//!
//! Tests:
//! - Commit, close and reopen for both strategies
//! - Commits across several sessions
//! - Concurrent readers during insertion
//! - Corrupted records are reported on load

#![cfg(feature = "rocksdb-backend")]

use meerdag::data::MemoryProvider;
use meerdag::storage::codec::id_key;
use meerdag::{
    AlgorithmKind, Bucket, CandidateBlock, DagConfig, DagError, Database, Hash, MeerDag, RocksDbStore, Transaction,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn h(name: &str) -> Hash {
    Hash::digest(name.as_bytes())
}

fn config(kind: AlgorithmKind) -> DagConfig {
    DagConfig { k: Some(3), ..DagConfig::with_algorithm(kind) }
}

fn open(path: &Path, kind: AlgorithmKind, provider: &Arc<MemoryProvider>) -> MeerDag {
    let store = Arc::new(RocksDbStore::open(path).unwrap());
    MeerDag::open(config(kind), store, provider.clone()).unwrap()
}

fn add(dag: &MeerDag, provider: &MemoryProvider, name: &str, parents: &[&str]) {
    let parents: Vec<Hash> = parents.iter().map(|p| h(p)).collect();
    let mut block = CandidateBlock::new(h(name), parents.clone()).timestamp(1_700_000_000);
    if !parents.is_empty() {
        block = block.main_parent(dag.select_main_parent(&parents).unwrap());
    }
    let block = Arc::new(block);
    provider.insert(block.clone());
    dag.add_block(block).unwrap();
}

fn build(dag: &MeerDag, provider: &MemoryProvider) {
    add(dag, provider, "G", &[]);
    add(dag, provider, "A", &["G"]);
    add(dag, provider, "S", &["G"]);
    add(dag, provider, "B", &["A"]);
    add(dag, provider, "M", &["B", "S"]);
    add(dag, provider, "T", &["M"]);
    add(dag, provider, "U", &["M"]);
}

#[test]
fn test_persist_and_reload() {
    for kind in [AlgorithmKind::Phantom, AlgorithmKind::Ghostdag] {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(MemoryProvider::new());

        let (state, order) = {
            let dag = open(temp_dir.path(), kind, &provider);
            build(&dag, &provider);
            assert!(dag.commit().unwrap());
            (dag.get_graph_state(), dag.ordered_hashes(0, usize::MAX))
        };

        let dag = open(temp_dir.path(), kind, &provider);
        assert_eq!(dag.algorithm(), kind);
        assert_eq!(dag.get_graph_state(), state);
        assert_eq!(dag.ordered_hashes(0, usize::MAX), order);
        assert!(dag.is_on_main_chain(&h("M")));
        assert!(!dag.has_pending());
    }
}

#[test]
fn test_sessions_accumulate() {
    let temp_dir = TempDir::new().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let kind = AlgorithmKind::Phantom;

    {
        let dag = open(temp_dir.path(), kind, &provider);
        add(&dag, &provider, "G", &[]);
        add(&dag, &provider, "A", &["G"]);
        dag.commit().unwrap();
    }
    {
        let dag = open(temp_dir.path(), kind, &provider);
        add(&dag, &provider, "S", &["G"]);
        dag.commit().unwrap();
        add(&dag, &provider, "M", &["A", "S"]);
        dag.commit().unwrap();
    }

    let dag = open(temp_dir.path(), kind, &provider);
    assert_eq!(dag.block_total(), 4);
    assert_eq!(dag.tips(), vec![h("M")]);
    assert_eq!(dag.get_block(&h("M")).unwrap().order, 3);
}

#[test]
fn test_concurrent_readers() {
    let temp_dir = TempDir::new().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let dag = Arc::new(open(temp_dir.path(), AlgorithmKind::Ghostdag, &provider));
    add(&dag, &provider, "G", &[]);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let dag = Arc::clone(&dag);
            thread::spawn(move || {
                for _ in 0..200 {
                    let state = dag.get_graph_state();
                    assert!(state.total() >= 1);
                    assert_eq!(state.tips().len(), 1);
                }
            })
        })
        .collect();

    let mut tip = "G".to_string();
    for i in 0..50 {
        let name = format!("C{}", i);
        add(&dag, &provider, &name, &[&tip]);
        tip = name;
    }
    for reader in readers {
        reader.join().unwrap();
    }
    dag.commit().unwrap();
    assert_eq!(dag.get_block(&h(&tip)).unwrap().height, 50);
}

#[test]
fn test_corrupted_order_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    {
        let dag = open(temp_dir.path(), AlgorithmKind::Ghostdag, &provider);
        build(&dag, &provider);
        dag.commit().unwrap();
    }
    {
        let store = RocksDbStore::open(temp_dir.path()).unwrap();
        let mut tx = Transaction::new();
        tx.delete(Bucket::Orders, id_key(2).to_vec());
        store.write(tx).unwrap();
    }

    let store = Arc::new(RocksDbStore::open(temp_dir.path()).unwrap());
    let err = MeerDag::open(config(AlgorithmKind::Ghostdag), store, provider.clone())
        .err()
        .unwrap();
    assert!(matches!(err, DagError::Corruption(_)));
}
