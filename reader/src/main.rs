use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use linda::{Buffer, SegmentError, ShmemConfig, SpaceError};

#[derive(Parser)]
#[clap(
    version,
    after_help = "Exit status: 0 ok, 1 other failure, 2 timeout, 3 space full, 4 invalid query or tuple, 5 no such segment.",
    about = "Takes, reads and inspects tuples in a shared memory tuple space",
)]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "linda.toml")]
    config: String,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Remove and print the first tuple matching the query.
    Input {
        query: String,
        /// Seconds to wait for a match.
        #[clap(short = 't', long = "timeout", default_value = "0")]
        timeout: f64,
    },
    /// Print the first tuple matching the query without removing it.
    Read {
        query: String,
        #[clap(short = 't', long = "timeout", default_value = "0")]
        timeout: f64,
    },
    /// Print the state of every slot, or only the live list with `--list`.
    Dump {
        #[clap(long)]
        list: bool,
    },
    /// Keep taking and printing matching tuples until interrupted.
    Watch {
        query: String,
        /// Seconds each wait blocks before the stop flag is looked at again.
        #[clap(short = 't', long = "timeout", default_value = "0.2")]
        timeout: f64,
    },
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ReaderConfig {
    shmem: ShmemConfig,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    if let Err(e) = run(opts) {
        if e.is_recoverable() {
            info!("{}", e);
        } else {
            error!(error = %e, "linda-reader failed");
        }
        std::process::exit(e.exit_code());
    }
}

fn timeout_of(secs: f64) -> Result<Duration, SpaceError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| SpaceError::Segment(SegmentError::Config(format!("timeout {}: {}", secs, e))))
}

fn run(opts: Opts) -> Result<(), SpaceError> {
    let cfg: ReaderConfig = confy::load_path(&opts.config)
        .map_err(|e| SegmentError::Config(format!("{}: {}", opts.config, e)))?;
    let buffer = Buffer::attach(&cfg.shmem)?;
    match opts.command {
        Command::Input { query, timeout } => {
            println!("{}", buffer.input(&query, timeout_of(timeout)?)?);
        }
        Command::Read { query, timeout } => {
            println!("{}", buffer.read(&query, timeout_of(timeout)?)?);
        }
        Command::Dump { list } => {
            let reports = if list {
                buffer.dump_list()?
            } else {
                buffer.dump_slots()?
            };
            for report in reports {
                println!("{}", report);
            }
        }
        Command::Watch { query, timeout } => watch(&buffer, &query, timeout_of(timeout)?)?,
    }
    Ok(())
}

fn watch(buffer: &Buffer, query: &str, poll: Duration) -> Result<(), SpaceError> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(SegmentError::Io)?;
    }
    info!(name = buffer.name(), query, "watching");
    let mut taken = 0u64;
    while !stop.load(Ordering::Relaxed) {
        match buffer.input(query, poll) {
            Ok(tuple) => {
                taken += 1;
                println!("{}", tuple);
            }
            Err(SpaceError::Timeout) => debug!("nothing yet"),
            Err(e) => return Err(e),
        }
    }
    info!(taken, "stopped");
    Ok(())
}
