//! Drives the tree and the hash map through a pseudo-random workload on a
//! real moving heap, then checks every result against a plain model.
//!
//! Usage:
//!   heap-stress --count 2000 --gc-always
//!   heap-stress --weak --dump heap.json

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::time::Instant;

use clap::Parser as ClapParser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rooted_collections::collections::{GcBox, GcHashMap, Tree, Zone};
use rooted_collections::gc::AllocatorOptions;
use rooted_collections::types::BuiltInTypes;
use rooted_collections::Heap;

#[derive(ClapParser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CommandLineArguments {
    /// Number of keys to insert.
    #[clap(long, default_value = "1000")]
    count: usize,
    #[clap(long, default_value = "42")]
    seed: u64,
    #[clap(long, default_value = "false")]
    gc_always: bool,
    #[clap(long, default_value = "false")]
    no_gc: bool,
    #[clap(long, default_value = "false")]
    show_gc_times: bool,
    /// Use a weak-keyed map and drop every other key before collecting.
    #[clap(long, default_value = "false")]
    weak: bool,
    /// Write a JSON heap dump here when done.
    #[clap(long)]
    dump: Option<String>,
}

fn int(value: isize) -> usize {
    BuiltInTypes::construct_int(value) as usize
}

fn unbox(value: usize) -> isize {
    BuiltInTypes::untag_isize(GcBox::get(value) as isize)
}

fn compare_boxed(_heap: &Heap, key: isize, value: usize) -> Ordering {
    key.cmp(&unbox(value))
}

fn hash_boxed(_heap: &Heap, key: usize) -> u32 {
    (unbox(key) as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) as u32
}

fn equal_boxed(_heap: &Heap, a: usize, b: usize) -> bool {
    GcBox::get(a) == GcBox::get(b)
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), Box<dyn Error>> {
    if condition {
        Ok(())
    } else {
        Err(message().into())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = CommandLineArguments::parse();
    let mut heap = Heap::new(AllocatorOptions {
        gc: !args.no_gc,
        gc_always: args.gc_always,
        print_stats: args.show_gc_times,
        ..AllocatorOptions::default()
    })?;
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(args.seed);

    run_tree(&mut heap, &mut rng, args.count)?;
    run_map(&mut heap, &mut rng, args.count, args.weak)?;

    if let Some(path) = &args.dump {
        heap.dump().write_to_file(path)?;
    }
    if args.show_gc_times {
        println!("{:?}", heap.stats());
        println!("Done in {:?}", start.elapsed());
    }
    println!("ok");
    Ok(())
}

fn run_tree(heap: &mut Heap, rng: &mut StdRng, count: usize) -> Result<(), Box<dyn Error>> {
    let mut zone = Zone::new();
    let sentinel = Tree::make_sentinel(heap)?;
    let sentinel_root = heap.add_root(sentinel);
    let tree_root = heap.add_root(sentinel);

    let mut model = BTreeMap::new();
    let mut halfway = None;
    while model.len() < count {
        let key = rng.random_range(0..count as i64 * 4) as isize;
        if model.contains_key(&key) {
            continue;
        }
        let boxed = GcBox::new(heap, int(key))?;
        let tree = heap.get_root(tree_root);
        let sentinel = heap.get_root(sentinel_root);
        let tree = Tree::insert(heap, &mut zone, tree, key, boxed, sentinel, compare_boxed)?;
        heap.set_root(tree_root, tree);
        model.insert(key, key);
        if model.len() == count / 2 {
            halfway = Some((heap.add_root(tree), model.clone()));
        }
    }

    // Updates replace the payload box but keep its key.
    let keys: Vec<isize> = model.keys().copied().step_by(3).collect();
    for key in keys {
        let replacement = GcBox::new(heap, int(key))?;
        let tree = heap.get_root(tree_root);
        let sentinel = heap.get_root(sentinel_root);
        Tree::update(heap, tree, key, replacement, sentinel, compare_boxed);
    }

    heap.gc();
    let sentinel = heap.get_root(sentinel_root);
    let tree = heap.get_root(tree_root);
    Tree::check_invariants(tree, sentinel)?;
    let mut in_order = Vec::new();
    Tree::for_each_in_order(tree, sentinel, |value| in_order.push(unbox(value)));
    let expected: Vec<isize> = model.keys().copied().collect();
    check(in_order == expected, || "tree contents diverged from model".to_string())?;

    if let Some((old_root, old_model)) = halfway {
        let old = heap.get_root(old_root);
        Tree::check_invariants(old, sentinel)?;
        check(Tree::len(old, sentinel) == old_model.len(), || {
            "older tree version changed size".to_string()
        })?;
        for key in model.keys() {
            let found = Tree::query(heap, old, *key, sentinel, compare_boxed).map(unbox);
            let expected = old_model.get(key).copied();
            check(found == expected, || format!("older version wrong at {}", key))?;
        }
        heap.remove_root(old_root);
    }
    heap.remove_root(tree_root);
    heap.remove_root(sentinel_root);
    Ok(())
}

fn run_map(
    heap: &mut Heap,
    rng: &mut StdRng,
    count: usize,
    weak: bool,
) -> Result<(), Box<dyn Error>> {
    let map = GcHashMap::new(heap, weak)?;
    let map_root = heap.add_root(map);
    let mut model = HashSet::new();
    let mut held = Vec::new();

    for _ in 0..count {
        let key = rng.random_range(0..count as i64) as isize;
        let probe = GcBox::new(heap, int(key))?;
        let map = heap.get_root(map_root);
        if model.contains(&key) {
            let removed = GcHashMap::remove(heap, map, probe, hash_boxed, equal_boxed)?;
            check(removed == Some(int(key)), || format!("remove lost {}", key))?;
            model.remove(&key);
        } else {
            // The probe box becomes the key; keep it alive for weak maps.
            let root = heap.add_root(probe);
            let map = heap.get_root(map_root);
            GcHashMap::insert(heap, map, probe, int(key), hash_boxed)?;
            held.push((key, root));
            model.insert(key);
        }
    }

    // Keys removed from the model no longer need their roots.
    let mut dropped = 0;
    for (key, root) in held {
        if !model.contains(&key) || (weak && key % 2 == 0) {
            heap.remove_root(root);
            if model.remove(&key) {
                dropped += 1;
            }
        }
    }
    heap.gc();

    let map = heap.get_root(map_root);
    let mut live = 0;
    GcHashMap::for_each(map, |_, _| live += 1);
    check(live == model.len(), || {
        format!("map holds {} live entries, expected {}", live, model.len())
    })?;
    if weak {
        check(GcHashMap::len(map) == model.len() + dropped, || {
            "cleared weak entries were purged without being touched".to_string()
        })?;
    }
    for key in 0..count as isize {
        let probe = GcBox::new(heap, int(key))?;
        let map = heap.get_root(map_root);
        let found = GcHashMap::get(heap, map, probe, hash_boxed, equal_boxed);
        check(found == model.contains(&key).then(|| int(key)), || {
            format!("lookup of {} disagrees with model", key)
        })?;
    }
    heap.remove_root(map_root);
    Ok(())
}
