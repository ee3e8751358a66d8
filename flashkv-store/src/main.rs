use std::env;
use std::fs::metadata;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use flashkv::{KvError, KvStore, Options};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use strum::EnumString;

type Store = KvStore<String, String>;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store location (created if missing)
    store: String,

    /// Empty the store after opening it
    #[arg(short, long, default_value_t = false)]
    truncate: bool,

    /// Extra room left in new blocks, as a percentage of their contents
    #[arg(short, long, default_value_t = 20)]
    percent_free: u8,

    #[command(subcommand)]
    parameter: Option<Parameter>,
}

#[derive(Debug, EnumString, Subcommand)]
#[strum(ascii_case_insensitive)]
enum Parameter {
    /// Does our store contain this key
    Contains { key: String },
    /// Display entry count
    Count,
    /// Delete this key
    Delete { key: String },
    /// List store entries
    Entries,
    /// List free blocks
    Free,
    /// Get this key
    Get { key: String },
    /// Interactive Help
    Help,
    /// Display store details
    Info,
    /// Insert key value pair
    Insert { key: String, value: String },
    /// List store keys
    Keys,
    /// Display the block offset of this key
    Offset { key: String },
    /// Remove every entry
    Truncate,
    /// Replace the value of an existing key
    Update { key: String, value: String },
    /// Insert or replace key value pair
    Upsert { key: String, value: String },
    /// Verify store
    Verify,
}

impl Parameter {
    /// Fill in the arguments EnumString leaves empty, or describe how to.
    fn with_args(self, args: &[&str]) -> std::result::Result<Self, &'static str> {
        let key = || args.first().map(|k| k.to_string());
        // Values may contain spaces
        let value = || (args.len() > 1).then(|| args[1..].join(" "));
        let parameter = match self {
            Parameter::Contains { .. } => Parameter::Contains {
                key: key().filter(|_| args.len() == 1).ok_or("usage: contains <key>")?,
            },
            Parameter::Delete { .. } => Parameter::Delete {
                key: key().filter(|_| args.len() == 1).ok_or("usage: delete <key>")?,
            },
            Parameter::Get { .. } => Parameter::Get {
                key: key().filter(|_| args.len() == 1).ok_or("usage: get <key>")?,
            },
            Parameter::Offset { .. } => Parameter::Offset {
                key: key().filter(|_| args.len() == 1).ok_or("usage: offset <key>")?,
            },
            Parameter::Insert { .. } => Parameter::Insert {
                key: key().ok_or("usage: insert <key> <value>")?,
                value: value().ok_or("usage: insert <key> <value>")?,
            },
            Parameter::Update { .. } => Parameter::Update {
                key: key().ok_or("usage: update <key> <value>")?,
                value: value().ok_or("usage: update <key> <value>")?,
            },
            Parameter::Upsert { .. } => Parameter::Upsert {
                key: key().ok_or("usage: upsert <key> <value>")?,
                value: value().ok_or("usage: upsert <key> <value>")?,
            },
            p => p,
        };
        Ok(parameter)
    }
}

fn get_history_file() -> Option<PathBuf> {
    dirs::preference_dir()
        .and_then(|mut base| {
            base.push("flashkv");
            // Note: Not create_dir_all(), because we don't want to create preference
            // dirs if they don't exist.
            if metadata(base.clone()).ok().is_none() {
                std::fs::create_dir(base.clone()).ok()?
            }
            Some(base)
        })
        .map(|mut base| {
            base.push("history.txt");
            base
        })
}

fn interactive(store: &Store) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.load_history(&file_location) {
            println!("error loading history: {e}");
        }
    }
    println!("terminate with ctrl-c or ctrl-d");
    loop {
        match rl.readline("flashkv: ") {
            Ok(line) => {
                let words = line.split_whitespace().collect::<Vec<&str>>();
                let Some((command, args)) = words.split_first() else {
                    continue;
                };
                let parameter = match Parameter::from_str(command) {
                    Ok(p) => match p.with_args(args) {
                        Ok(p) => p,
                        Err(usage) => {
                            println!("{usage}");
                            continue;
                        }
                    },
                    Err(e) => {
                        println!("error: {e}");
                        continue;
                    }
                };
                process_parameter(store, &parameter);
                rl.add_history_entry(line.as_str())?;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("terminating...");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.save_history(&file_location) {
            println!("error saving history: {e}");
        }
    }
    Ok(())
}

fn process_parameter(store: &Store, parameter: &Parameter) {
    tracing::debug!(?parameter, "processing");
    match parameter {
        Parameter::Contains { key } => match store.find_block_offset(key) {
            Ok(_) => println!("true"),
            Err(KvError::NotFound) => println!("false"),
            Err(e) => println!("error: {e}"),
        },
        Parameter::Count => println!("count: {}", store.size()),
        Parameter::Delete { key } => match store.delete(key) {
            Ok(()) => println!("deleted: {key}"),
            Err(KvError::NotFound) => println!("not found"),
            Err(err) => println!("delete failed: {err}"),
        },
        Parameter::Entries => {
            for (key, offset) in store {
                match store.find_value_at(&key, offset) {
                    Ok(value) => println!("{key}: {value}"),
                    Err(e) => println!("{key}: error: {e}"),
                }
            }
        }
        Parameter::Free => {
            let blocks = store.free_blocks();
            for block in &blocks {
                println!("offset: {}, size: {}", block.offset, block.size);
            }
            println!(
                "free blocks: {}, free bytes: {}",
                blocks.len(),
                blocks.iter().map(|block| block.size).sum::<usize>()
            );
        }
        Parameter::Get { key } => match store.find_value(key) {
            Ok(value) => println!("{value}"),
            Err(KvError::NotFound) => println!("not found"),
            Err(e) => println!("error: {e}"),
        },
        Parameter::Help => {
            let help = Cli::command().render_help().to_string();

            let mut print_it = false;

            for line in help.lines() {
                if line.starts_with("Arguments:") {
                    print_it = false;
                }
                if print_it && !line.is_empty() {
                    println!("{}", line);
                }
                if line.starts_with("Commands:") {
                    print_it = true;
                }
            }
        }
        Parameter::Info => {
            store.info();
            println!("state: {}", store.state());
            println!("entries: {}", store.size());
            println!("data file size: {}", store.data_file_size());
            println!("free blocks: {}", store.free_blocks().len());
            println!("errors: {}", store.errors());
        }
        Parameter::Insert { key, value } => match store.insert(key.clone(), value.clone()) {
            Ok(()) => println!("inserted: {key}: {value}"),
            Err(KvError::NotUnique) => println!("already present: {key}"),
            Err(err) => println!("insert failed: {err}"),
        },
        Parameter::Keys => {
            for (key, _) in store {
                println!("{key}");
            }
        }
        Parameter::Offset { key } => match store.find_block_offset(key) {
            Ok(offset) => println!("{offset}"),
            Err(KvError::NotFound) => println!("not found"),
            Err(e) => println!("error: {e}"),
        },
        Parameter::Truncate => match store.truncate() {
            Ok(()) => println!("truncated"),
            Err(e) => println!("error: {e}"),
        },
        Parameter::Update { key, value } => match store.update(key, value.clone()) {
            Ok(()) => println!("updated: {key}: {value}"),
            Err(KvError::NotFound) => println!("not found"),
            Err(err) => println!("update failed: {err}"),
        },
        Parameter::Upsert { key, value } => match store.upsert(key.clone(), value.clone()) {
            Ok(()) => println!("upserted: {key}: {value}"),
            Err(err) => println!("upsert failed: {err}"),
        },
        Parameter::Verify => match store.verify() {
            Ok(()) => println!("Ok"),
            Err(e) => println!("Verification failed: {e}"),
        },
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match env::var("TMPDIR") {
        Ok(d) => d,
        Err(_e) => ".".to_string(),
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "flashkv.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt().with_writer(non_blocking).init();

    let options = Options::default().with_percent_free(cli.percent_free);
    let store = Store::try_open(&cli.store, options)?;
    if store.errors().contains(KvError::DataChanged) {
        println!("repaired duplicate entries while loading {}", cli.store);
    }
    if cli.truncate {
        store.truncate()?;
    }

    match cli.parameter {
        Some(parameter) => process_parameter(&store, &parameter),
        None => interactive(&store)?,
    }
    store.close()?;
    Ok(())
}
