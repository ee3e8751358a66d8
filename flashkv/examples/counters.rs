use anyhow::Result;

use flashkv::{KvStore, MemoryFile, Options};

const TEXT: &str = "the quick brown fox jumps over the lazy dog and the dog sleeps";

fn main() -> Result<()> {
    let store = KvStore::<String, u32>::new(Options::default().with_percent_free(0));
    store.load_storage(Box::new(MemoryFile::new()))?;

    for word in TEXT.split_whitespace() {
        store.upsert_with(word.to_string(), |count| count + 1, 1)?;
    }

    // Keys arrive in order, along with the offset of the block holding each value
    for (word, offset) in &store {
        let count = store.find_value_at(&word, offset)?;
        println!("{word:>8}: {count}");
    }

    store.verify()?;
    Ok(())
}
