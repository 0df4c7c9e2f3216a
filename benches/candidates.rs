//! Micro-benchmarks for the ClosestCandidates set: add, get, and the
//! distance comparisons underneath them, at lookup-realistic sizes.
//! Reports nanoseconds-per-operation.
//!
//! Every response folds up to eight nodes back into this set, so add on
//! a full set is the hot path of a lookup.
//!
//! Run: `cargo bench --bench candidates`

use std::time::Instant;

use xorkad::rpc::ClosestCandidates;
use xorkad::{Id, Node};

fn main() {
    println!("candidates\n");

    bench_add();
    bench_get();
    bench_distance();
}

fn bench_add() {
    println!("add");

    // Filling empty sets to capacity
    {
        let target = Id::random();

        // Pre-generate random nodes outside the timed section
        let batches: Vec<Vec<Node>> = (0..100)
            .map(|_| (0..16).map(|_| Node::random()).collect())
            .collect();

        let start = Instant::now();
        for batch in &batches {
            let mut candidates = ClosestCandidates::new(target, 16);
            for node in batch.iter().cloned() {
                candidates.add(node);
            }
        }
        let per_op = start.elapsed().as_nanos() / (100 * 16) as u128;
        println!("empty set:        {per_op}ns/op");
    }

    // Full sets, where random nodes are mostly rejected
    for capacity in [16, 64, 256] {
        let target = Id::random();
        let mut candidates = ClosestCandidates::new(target, capacity);
        for _ in 0..capacity * 4 {
            candidates.add(Node::random());
        }

        let fresh: Vec<_> = (0..1000).map(|_| Node::random()).collect();
        let start = Instant::now();
        for node in fresh {
            candidates.add(node);
        }
        let per_op = start.elapsed().as_nanos() / 1000;
        println!("full, {capacity:>3} slots:   {per_op}ns/op");
    }

    println!();
}

fn bench_get() {
    println!("get");

    for capacity in [16, 64, 256] {
        let target = Id::random();
        let mut candidates = ClosestCandidates::new(target, capacity);
        for _ in 0..capacity * 4 {
            candidates.add(Node::random());
        }

        let held: Vec<Id> = candidates.iter().map(|candidate| candidate.id()).collect();
        let misses: Vec<Id> = (0..held.len()).map(|_| Id::random()).collect();

        let n = 1000;

        let start = Instant::now();
        for i in 0..n {
            let _ = candidates.get(&held[i % held.len()]);
        }
        let hit = start.elapsed().as_nanos() / n as u128;

        let start = Instant::now();
        for i in 0..n {
            let _ = candidates.get(&misses[i % misses.len()]);
        }
        let miss = start.elapsed().as_nanos() / n as u128;

        println!("{capacity:>3} slots: {hit}ns/op hit, {miss}ns/op miss");
    }

    println!();
}

fn bench_distance() {
    println!("distance");

    let target = Id::random();
    let ids: Vec<Id> = (0..1000).map(|_| Id::random()).collect();

    {
        let start = Instant::now();
        for id in &ids {
            let _ = target.xor(id);
        }
        let per_op = start.elapsed().as_nanos() / ids.len() as u128;
        println!("xor:               {per_op}ns/op");
    }

    {
        let start = Instant::now();
        for pair in ids.windows(2) {
            let _ = target.three_way_compare(&pair[0], &pair[1]);
        }
        let per_op = start.elapsed().as_nanos() / (ids.len() - 1) as u128;
        println!("three_way_compare: {per_op}ns/op");
    }

    println!();
}
