use super::*;

use std::collections::BTreeMap;

use rand::Rng;

/// Worst case AVL height for n entries.
fn height_bound(len: usize) -> usize {
    (1.45 * ((len + 2) as f64).log2()).ceil() as usize
}

#[test]
fn it_searches_empty_map() {
    let map = Map::<String, u32>::new();
    assert!(map.is_empty());
    assert_eq!(map.height(), 0);
    assert_eq!(map.find(&"something".to_string()), None);
    assert_eq!(map.iter().count(), 0);
    assert!(map.cursor().is_done());
}

#[test]
fn it_inserts_and_finds() {
    let mut map = Map::new();
    for i in [50, 20, 70, 10, 30, 60, 80] {
        map.insert(i, i * 10).expect("insert worked");
    }
    assert_eq!(map.len(), 7);
    assert_eq!(map.height(), 3);
    for i in [50, 20, 70, 10, 30, 60, 80] {
        assert_eq!(map.find(&i), Some(&(i * 10)));
    }
    assert_eq!(map.find(&55), None);
    assert!(map.verify());
}

#[test]
fn it_rejects_duplicate_keys() {
    let mut map = Map::new();
    map.insert("a", 1).expect("insert worked");
    map.insert("b", 2).expect("insert worked");
    assert_eq!(map.insert("a", 3), Err(KvError::NotUnique));
    assert_eq!(map.len(), 2);
    assert_eq!(map.find(&"a"), Some(&1));
    assert!(map.errors().contains(KvError::NotUnique));
    map.clear_errors();
    assert!(map.errors().is_empty());
    assert!(map.verify());
}

#[test]
fn it_erases_and_reports_missing_keys() {
    let mut map = Map::new();
    for i in 0..10 {
        map.insert(i, i).expect("insert worked");
    }
    assert_eq!(map.erase(&4), Ok(4));
    assert_eq!(map.erase(&4), Err(KvError::NotFound));
    assert!(map.errors().contains(KvError::NotFound));
    assert_eq!(map.len(), 9);
    assert!(!map.contains_key(&4));
    assert!(map.verify());
}

#[test]
fn it_erases_nodes_with_two_children() {
    let mut map = Map::new();
    for i in [50, 20, 70, 10, 30, 60, 80, 65] {
        map.insert(i, ()).expect("insert worked");
    }
    // 50 is the root with two children; its successor (60) has a right child
    map.erase(&50).expect("erase worked");
    assert!(map.verify());
    let keys = map.iter().map(|(k, _)| *k).collect::<Vec<_>>();
    assert_eq!(keys, vec![10, 20, 30, 60, 65, 70, 80]);
}

#[test]
fn it_iterates_in_order() {
    let mut map = Map::new();
    let input = vec![
        7, 8, 14, 20, 21, 27, 34, 42, 43, 47, 48, 52, 64, 72, 90, 91, 93, 94, 97,
    ];
    for i in input.iter().rev() {
        map.insert(*i, i.to_string()).expect("insert worked");
    }
    let keys = map.iter().map(|(k, _)| *k).collect::<Vec<usize>>();
    assert_eq!(input, keys);
    assert_eq!(map.iter().size_hint(), (input.len(), Some(input.len())));
    for (k, v) in &map {
        assert_eq!(*v, k.to_string());
    }
}

#[test]
fn it_steps_a_detached_cursor() {
    let mut map = Map::new();
    for i in (0..100).rev() {
        map.insert(i, i * 2).expect("insert worked");
    }
    let mut cursor = map.cursor();
    let mut expected = 0;
    while let Some((k, v)) = cursor.next(&map) {
        assert_eq!(*k, expected);
        assert_eq!(*v, expected * 2);
        // Values may change between steps, the structure does not
        if let Some(v) = map.find_mut(&expected) {
            *v += 1;
        }
        expected += 1;
    }
    assert_eq!(expected, 100);
    assert!(cursor.is_done());
}

#[test]
fn it_stops_a_cursor_after_the_map_is_cleared() {
    let mut map = Map::new();
    for i in 0..20 {
        map.insert(i, ()).expect("insert worked");
    }
    let mut cursor = map.cursor();
    assert!(cursor.next(&map).is_some());
    map.clear();
    assert!(cursor.next(&map).is_none());
}

#[test]
fn it_finds_or_inserts() {
    let mut map = Map::new();
    map.insert("counter", 5).expect("insert worked");
    assert_eq!(map.find_or_insert("counter", 0), Ok((5, false)));
    assert_eq!(map.find_or_insert("other", 0), Ok((0, true)));
    assert_eq!(map.len(), 2);
    assert_eq!(map.find(&"other"), Some(&0));
}

#[test]
fn it_stays_balanced_with_sequential_inserts() {
    let mut map = Map::new();
    for i in 0..4_000 {
        map.insert(i, i).expect("insert worked");
    }
    assert!(map.height() <= height_bound(map.len()));
    for i in (0..4_000).step_by(2) {
        map.erase(&i).expect("erase worked");
    }
    assert!(map.height() <= height_bound(map.len()));
    assert!(map.verify());
}

#[test]
fn it_clears_and_reuses() {
    let mut map = Map::new();
    for i in 0..200 {
        map.insert(i, i).expect("insert worked");
    }
    map.clear();
    assert!(map.is_empty());
    assert_eq!(map.find(&3), None);
    map.insert(3, 4).expect("insert worked");
    assert_eq!(map.find(&3), Some(&4));
    assert!(map.verify());
}

#[test_log::test]
fn it_matches_a_model_under_random_workload() {
    let mut map = Map::new();
    let mut model = BTreeMap::new();
    let mut rng = rand::thread_rng();
    for _ in 0..5_000 {
        let key = rng.gen_range(0..1_000u32);
        if rng.gen_bool(0.6) {
            let expected = if model.contains_key(&key) {
                Err(KvError::NotUnique)
            } else {
                model.insert(key, key);
                Ok(())
            };
            assert_eq!(map.insert(key, key), expected);
        } else {
            let expected = model.remove(&key).ok_or(KvError::NotFound);
            assert_eq!(map.erase(&key), expected);
        }
        assert!(map.height() <= height_bound(map.len()));
    }
    tracing::debug!(len = map.len(), height = map.height(), "random workload");
    assert!(map.verify());
    assert_eq!(map.len(), model.len());
    let ours = map.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>();
    let theirs = model.into_iter().collect::<Vec<_>>();
    assert_eq!(ours, theirs);
}
