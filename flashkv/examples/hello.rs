use anyhow::Result;

use flashkv::{KvError, KvStore, Options};

fn main() -> Result<()> {
    let key = "something".to_string();
    let value = 3;

    // Open (or create) a store which leaves 20% of every new block free for growth
    let store = KvStore::<String, usize>::try_open("hello.db", Options::default())?;

    // Make sure we can't find "something" in our store
    assert_eq!(store.find_value(&key), Err(KvError::NotFound));

    // Insert "something" with a value of 3
    store.insert(key.clone(), value)?;
    assert_eq!(store.find_value(&key), Ok(value));

    // Change it, then remove it
    store.update(&key, value * 2)?;
    assert_eq!(store.find_value(&key), Ok(6));
    store.delete(&key)?;
    assert_eq!(store.find_value(&key), Err(KvError::NotFound));

    // The block it occupied is kept for reuse
    println!("free blocks: {:?}", store.free_blocks());

    store.close()?;
    std::fs::remove_file("hello.db")?;
    Ok(())
}
