use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // stderr keeps simulation output on stdout clean for piping
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();

    let _ = set_global_default(subscriber);
}

use swarmq::{Bundle, BundleQueue, NullStore, Priority, QueueItem, SearchSettings, WeightedRng};

fn main() {
    let opts = Opts::parse();
    init_tracing(1 + opts.verbose.saturating_sub(opts.quiet));
    if let Err(e) = run(opts) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(opts: Opts) -> anyhow::Result<()> {
    match opts.command {
        Command::Simulate { bundles, minutes, seed, search_time } => {
            simulate(bundles, minutes, seed, search_time);
        }
    }
    Ok(())
}

/// Build a synthetic queue and replay scheduler ticks over virtual minutes,
/// printing each pick.
fn simulate(bundle_count: usize, minutes: u64, seed: Option<u64>, search_time: u32) {
    let mut settings = SearchSettings::default();
    settings.search_time_min = search_time;

    let picker = match seed {
        Some(s) => WeightedRng::seeded(s),
        None => WeightedRng::new(),
    };
    let mut queue = BundleQueue::with_picker(settings, Arc::new(NullStore), Box::new(picker));

    let priorities = [Priority::Low, Priority::Normal, Priority::Normal, Priority::High, Priority::Highest];
    for i in 0..bundle_count {
        let token = format!("bundle{i}");
        let target = format!("/downloads/Release.{i:03}");
        let bundle = Bundle::directory(token.as_str(), target.as_str(), priorities[i % priorities.len()], 0);
        queue.add_bundle(bundle, 0);
        queue.add_bundle_item(QueueItem::new(format!("{target}/payload.bin"), 1 << 20), &token);
    }
    println!("queue holds {} bundles", queue.len());

    let mut picks = 0usize;
    for minute in 0..minutes {
        let now_ms = minute * 60_000;
        if let Some(token) = queue.pick_next_search(now_ms, false) {
            let bundle = queue.find_bundle(&token).expect("picked bundle exists");
            println!(
                "minute {minute:>4}: search {} ({:?}, {})",
                token,
                bundle.priority(),
                bundle.target(),
            );
            picks += 1;
        }
    }
    println!("{picks} searches issued over {minutes} minutes");
}

#[derive(Parser)]
#[command(version, about = "swarmq queue simulation driver")]
pub struct Opts {
    /// Increase verbosity (-v, -vv). Default INFO.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Decrease verbosity (-q). Each -q reduces level by one step.
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay the auto-search scheduler over a synthetic queue
    Simulate {
        /// Number of bundles to queue
        #[arg(long, default_value_t = 10)]
        bundles: usize,
        /// Virtual minutes to run
        #[arg(long, default_value_t = 180)]
        minutes: u64,
        /// Seed for the band picker (entropy when omitted)
        #[arg(long)]
        seed: Option<u64>,
        /// Search interval floor in minutes
        #[arg(long, default_value_t = 5)]
        search_time: u32,
    },
}
