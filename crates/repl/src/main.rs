//! Line-oriented console for the on-disk multimap index.
//!
//! Reads an operation count, then one operation per line:
//!
//! ```text
//! insert <key> <value>
//! find <key>
//! delete <key> <value>
//! ```
//!
//! `find` prints the values stored under the key in ascending order,
//! space-separated, or `null` when there are none.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use btree::BPlusTree;
use clap::Parser;
use common::{FixedStr, TreeConfig};

const DEFAULT_TREE_FILE: &str = "tree.idx";
const DEFAULT_DATA_FILE: &str = "data.idx";

/// Keys occupy a fixed-size slot inside a page.
type Key = FixedStr<64>;

#[derive(Parser, Debug)]
#[command(name = "bpt-repl", about = "Console for the disk-resident B+ tree index")]
struct Args {
    /// File holding inner pages
    #[arg(long, default_value = DEFAULT_TREE_FILE)]
    tree_file: PathBuf,
    /// File holding leaf pages
    #[arg(long, default_value = DEFAULT_DATA_FILE)]
    data_file: PathBuf,
    /// Pages held per in-memory cache
    #[arg(long, default_value_t = 3000)]
    cache_pages: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = TreeConfig::builder().cache_pages(args.cache_pages).build();
    let mut index: BPlusTree<Key, i32> =
        BPlusTree::open(&args.tree_file, &args.data_file, config)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut lines = stdin.lock().lines();

    let count: usize = match lines.next() {
        Some(line) => line?.trim().parse().context("operation count")?,
        None => 0,
    };

    for _ in 0..count {
        let Some(line) = lines.next() else { break };
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("insert") => {
                let key: Key = parts.next().context("insert needs a key")?.parse()?;
                let value: i32 = parts.next().context("insert needs a value")?.parse()?;
                index.insert(key, value)?;
            }
            Some("find") => {
                let key: Key = parts.next().context("find needs a key")?.parse()?;
                let values = index.find(&key)?;
                if values.is_empty() {
                    writeln!(out, "null")?;
                } else {
                    let rendered: Vec<String> = values.iter().map(i32::to_string).collect();
                    writeln!(out, "{}", rendered.join(" "))?;
                }
            }
            Some("delete") => {
                let key: Key = parts.next().context("delete needs a key")?.parse()?;
                let value: i32 = parts.next().context("delete needs a value")?.parse()?;
                index.erase(&key, &value)?;
            }
            Some(op) => eprintln!("unknown operation: {op}"),
            None => {}
        }
    }

    index.close()?;
    Ok(())
}
