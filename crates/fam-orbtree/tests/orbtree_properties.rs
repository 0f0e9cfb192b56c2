//! Randomised invariant tests for the dual-ordering tree.
//!
//! Every run is seeded, so failures reproduce exactly.

use fam_orbtree::OrbTree;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Reference model: key → value plus insertion order of live keys.
#[derive(Default)]
struct Model {
    map: BTreeMap<u32, u64>,
    seq: Vec<u32>,
}

impl Model {
    fn put(&mut self, key: u32, value: u64) -> Option<u64> {
        self.seq.retain(|k| *k != key);
        self.seq.push(key);
        self.map.insert(key, value)
    }

    fn remove(&mut self, key: u32) -> Option<u64> {
        self.seq.retain(|k| *k != key);
        self.map.remove(&key)
    }
}

fn assert_matches_model(tree: &OrbTree<u32, u64>, model: &Model) {
    tree.validate().unwrap();
    assert_eq!(tree.len(), model.map.len());

    let keys: Vec<u32> = tree.iter().map(|(k, _)| *k).collect();
    let expected: Vec<u32> = model.map.keys().copied().collect();
    assert_eq!(keys, expected);

    let seq: Vec<u32> = tree.iter_seq().map(|(k, _)| *k).collect();
    assert_eq!(seq, model.seq);
}

#[test]
fn random_put_remove_keeps_invariants() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tree = OrbTree::new();
        let mut model = Model::default();

        for step in 0..600u64 {
            let key = rng.gen_range(0..200u32);
            match rng.gen_range(0..10) {
                0..=5 => {
                    let old = tree.put(key, step).map(|(_, v)| v);
                    assert_eq!(old, model.put(key, step));
                }
                6..=8 => {
                    let removed = tree.remove(&key).map(|(_, v)| v);
                    assert_eq!(removed, model.remove(key));
                }
                _ => {
                    if !model.seq.is_empty() {
                        let index = rng.gen_range(0..model.seq.len());
                        let expected_key = model.seq[index];
                        let (k, _) = tree.remove_index(index).unwrap();
                        assert_eq!(k, expected_key);
                        model.remove(expected_key);
                    }
                }
            }
            assert_matches_model(&tree, &model);
        }
    }
}

#[test]
fn get_succeeds_exactly_for_live_keys() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut tree = OrbTree::new();
    let mut model = Model::default();
    for step in 0..400u64 {
        let key = rng.gen_range(0..100u32);
        if rng.gen_bool(0.6) {
            tree.put(key, step);
            model.put(key, step);
        } else {
            tree.remove(&key);
            model.remove(key);
        }
    }
    for key in 0..100u32 {
        assert_eq!(tree.get(&key).copied(), model.map.get(&key).copied());
    }
}

#[test]
fn rank_queries_have_exactly_i_predecessors() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut tree = OrbTree::new();
    let mut keys = Vec::new();
    while keys.len() < 300 {
        let key = rng.gen::<u32>();
        if !tree.contains_key(&key) {
            tree.put(key, 0u64);
            keys.push(key);
        }
    }

    for i in 0..keys.len() {
        let (k, _) = tree.nth(i).unwrap();
        let smaller = keys.iter().filter(|other| *other < k).count();
        assert_eq!(smaller, i);
        assert_eq!(tree.rank(k), Some(i));
    }

    // seq ordering: the i-th entry was the i-th inserted
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(tree.get_index(i).map(|(k, _)| k), Some(key));
    }
    assert!(tree.nth(keys.len()).is_none());
    assert!(tree.get_index(keys.len()).is_none());
}

#[test]
fn descending_and_ascending_bulk_loads_stay_balanced() {
    let mut tree = OrbTree::new();
    for k in (0..1000u32).rev() {
        tree.put(k, u64::from(k));
    }
    tree.validate().unwrap();
    for k in (0..1000u32).step_by(2) {
        tree.remove(&k).unwrap();
    }
    tree.validate().unwrap();
    assert_eq!(tree.len(), 500);
    assert_eq!(tree.first().map(|(k, _)| *k), Some(1));
    while tree.remove_index(0).is_some() {}
    assert!(tree.is_empty());
    tree.validate().unwrap();
}

#[test]
fn weighted_lottery_tracks_weights() {
    let mut tree = OrbTree::new();
    tree.put_weighted(1u32, "ten", 10);
    tree.put_weighted(2u32, "twenty", 20);
    tree.put_weighted(3u32, "seventy", 70);

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut hits = [0usize; 3];
    let draws = 10_000;
    for _ in 0..draws {
        let draw = rng.gen_range(0..tree.total_weight());
        let (k, _) = tree.pick_weighted(draw).unwrap();
        hits[(*k - 1) as usize] += 1;
    }

    let share = |n: usize| n as f64 / draws as f64;
    // 4 sigma for p = 0.7 over 10k draws is about 0.018
    assert!((share(hits[2]) - 0.70).abs() < 0.02, "hits {:?}", hits);
    assert!((share(hits[1]) - 0.20).abs() < 0.02, "hits {:?}", hits);
    assert!((share(hits[0]) - 0.10).abs() < 0.02, "hits {:?}", hits);
}

#[test]
fn weight_sums_survive_random_churn() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut tree = OrbTree::new();
    let mut expected_total = BTreeMap::new();
    for _ in 0..500 {
        let key = rng.gen_range(0..64u32);
        if rng.gen_bool(0.7) {
            let weight = rng.gen_range(0..50u64);
            tree.put_weighted(key, (), weight);
            expected_total.insert(key, weight);
        } else {
            tree.remove(&key);
            expected_total.remove(&key);
        }
        tree.validate().unwrap();
        assert_eq!(tree.total_weight(), expected_total.values().sum::<u64>());
    }
}
