use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hashchain_core::{mine_parallel, Block, Chain, Difficulty, MineOptions, PendingBlock};
use std::{fs, io, path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hashchain")]
#[command(about = "Build, mine and verify a hash-linked proof-of-work chain")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct MiningArgs {
    /// Leading zero hex digits each mined hash must have
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    difficulty: i64,
    /// Give up on a block after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Search nonces on all cores
    #[arg(long)]
    parallel: bool,
}

impl MiningArgs {
    fn difficulty(&self) -> Result<u32> {
        Ok(Difficulty::try_from(self.difficulty)?.get())
    }

    /// Fresh per block, so a timeout bounds each block rather than the run.
    fn options(&self) -> MineOptions {
        match self.timeout_ms {
            Some(ms) => MineOptions::default().with_timeout(Duration::from_millis(ms)),
            None => MineOptions::default(),
        }
    }

    fn mine(&self, pending: PendingBlock) -> Result<Block> {
        let difficulty = self.difficulty()?;
        let block = if self.parallel {
            mine_parallel(pending, difficulty, &self.options())?
        } else {
            pending.mine(difficulty, &self.options())?
        };
        Ok(block)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk through genesis, plain extension and mined extension
    Demo {
        /// Difficulty used for the mined steps
        #[arg(long, default_value_t = 4, allow_negative_numbers = true)]
        difficulty: i64,
        /// Print the final chain as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mine a single standalone block
    Mine {
        /// Block payload
        #[arg(long)]
        data: String,
        #[arg(long, default_value_t = 1)]
        index: u64,
        #[arg(long, default_value = "0")]
        previous_hash: String,
        #[command(flatten)]
        mining: MiningArgs,
        /// Print the block as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build a chain of N blocks after genesis and print it as JSON
    Build {
        #[arg(long)]
        blocks: u64,
        #[arg(long, default_value = "Block")]
        data_prefix: String,
        #[command(flatten)]
        mining: MiningArgs,
    },
    /// Validate a JSON chain read from PATH, or stdin when omitted
    Verify { path: Option<PathBuf> },
}

fn print_block(block: &Block) {
    println!(
        "#{} nonce={} ts={} prev={} hash={} data={:?}",
        block.index(),
        block.nonce(),
        block.timestamp(),
        block.previous_hash(),
        block.hash(),
        block.data()
    );
}

fn demo(difficulty: i64, json: bool) -> Result<()> {
    let difficulty = Difficulty::try_from(difficulty)?.get();

    let mut chain = Chain::new();
    info!("created chain with genesis {}", chain.tip().hash());

    chain.extend("Block 1 data", 0)?;

    let standalone = PendingBlock::new(1, "Mining test data", "0")
        .mine(difficulty, &MineOptions::default())?;
    info!("standalone block mined with nonce {}", standalone.nonce());

    chain.extend("Blockchain mining test data", difficulty)?;
    chain.validate()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
    } else {
        println!("standalone:");
        print_block(&standalone);
        println!("chain:");
        chain.iter().for_each(print_block);
    }
    Ok(())
}

fn build(blocks: u64, data_prefix: &str, mining: &MiningArgs) -> Result<Chain> {
    let mut chain = Chain::new();
    for i in 1..=blocks {
        let pending = chain.next_block(format!("{data_prefix} {i}"));
        let block = mining
            .mine(pending)
            .with_context(|| format!("mining block {i}"))?;
        chain.append(block)?;
    }
    Ok(chain)
}

fn verify(path: Option<PathBuf>) -> Result<usize> {
    let raw = match &path {
        Some(p) => fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?,
        None => io::read_to_string(io::stdin()).context("reading stdin")?,
    };
    let blocks: Vec<Block> = serde_json::from_str(&raw).context("parsing chain JSON")?;
    let chain = Chain::from_blocks(blocks)?;
    Ok(chain.len())
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo { difficulty, json } => demo(difficulty, json)?,
        Command::Mine {
            data,
            index,
            previous_hash,
            mining,
            json,
        } => {
            let block = mining.mine(PendingBlock::new(index, data, previous_hash))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&block)?);
            } else {
                print_block(&block);
            }
        }
        Command::Build {
            blocks,
            data_prefix,
            mining,
        } => {
            let chain = build(blocks, &data_prefix, &mining)?;
            println!("{}", serde_json::to_string_pretty(&chain)?);
        }
        Command::Verify { path } => {
            let len = verify(path)?;
            println!("valid ({len} blocks)");
        }
    }
    Ok(())
}
