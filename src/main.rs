use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use chunkvault::{MemMetaStore, Store, StoreConfig};
use tracing_subscriber::EnvFilter;

const META_SNAPSHOT: &str = "meta.bin";

#[derive(Parser)]
#[command(name = "chunkvault", about = "Fixed-size content-addressed chunk store")]
struct Cli {
    /// Directory holding shard files and the meta-store snapshot.
    #[arg(long, default_value = "storage")]
    directory: PathBuf,

    /// Maximum payload size per chunk, in bytes.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    max_chunk_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a chunk under a hex address, reading its payload from a file.
    Put {
        address_hex: String,
        payload_path: PathBuf,
    },
    /// Fetch a chunk by hex address and write its payload to a file.
    Get {
        address_hex: String,
        output_path: PathBuf,
    },
    /// Report whether an address currently has a live chunk.
    Has { address_hex: String },
    /// Remove a chunk, freeing its slot for reuse.
    Delete { address_hex: String },
    /// Print the number of live addresses.
    Count,
    /// List every live address, one hex string per line.
    Iterate,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.directory).context("creating store directory")?;

    // MemMetaStore itself has no on-disk durability story, so the CLI
    // snapshots it to a single bincode file on exit and reloads it on the
    // next invocation purely as a convenience, so `put` in one run and
    // `get` in the next actually round-trip.
    let snapshot_path = cli.directory.join(META_SNAPSHOT);
    let meta = Arc::new(if snapshot_path.exists() {
        MemMetaStore::load_from(&snapshot_path).context("loading meta-store snapshot")?
    } else {
        MemMetaStore::new(chunkvault::SHARD_COUNT)
    });

    let config = StoreConfig::new(&cli.directory, cli.max_chunk_size);
    let store = Store::open(config, Box::new(Arc::clone(&meta))).context("opening chunk store")?;

    let result = run(&store, cli.command);
    store.close().context("closing chunk store")?;

    if let Err(e) = meta.snapshot_to(&snapshot_path) {
        eprintln!("warning: failed to persist meta-store snapshot: {e}");
    }

    result
}

fn run(store: &Store, command: Command) -> Result<()> {
    match command {
        Command::Put {
            address_hex,
            payload_path,
        } => {
            let address = decode_hex(&address_hex)?;
            let payload = std::fs::read(&payload_path)
                .with_context(|| format!("reading {}", payload_path.display()))?;
            store.put(&address, &payload)?;
            println!("stored {} bytes under {address_hex}", payload.len());
            Ok(())
        }
        Command::Get {
            address_hex,
            output_path,
        } => {
            let address = decode_hex(&address_hex)?;
            let payload = store.get(&address)?;
            std::fs::write(&output_path, &payload)
                .with_context(|| format!("writing {}", output_path.display()))?;
            println!("wrote {} bytes to {}", payload.len(), output_path.display());
            Ok(())
        }
        Command::Has { address_hex } => {
            let address = decode_hex(&address_hex)?;
            println!("{}", store.has(&address)?);
            Ok(())
        }
        Command::Delete { address_hex } => {
            let address = decode_hex(&address_hex)?;
            store.delete(&address)?;
            println!("deleted {address_hex}");
            Ok(())
        }
        Command::Count => {
            println!("{}", store.count()?);
            Ok(())
        }
        Command::Iterate => {
            store.iterate(|chunk| {
                println!("{}", encode_hex(&chunk.address));
                Ok(true)
            })?;
            Ok(())
        }
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        anyhow::bail!("address hex string must have even length");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("invalid hex byte"))
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
