use arena_tables::HashTable;
use arena_tables::allocator::AllocStats;
use arena_tables::allocator::Global;
use arena_tables::allocator::Tracking;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
struct Args {
    /// Number of keys to insert.
    #[arg(short = 'n', long = "count", default_value_t = 1000)]
    count: usize,

    /// Initial bucket count.
    #[arg(short = 'b', long = "buckets", default_value_t = 2)]
    buckets: usize,

    /// Shift keys into the high bits so they share low bits and pile into
    /// few buckets.
    #[arg(long = "clustered")]
    clustered: bool,

    /// Print growth events as they happen.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
            .init();
    }

    let stats = AllocStats::new();
    let mut table = match HashTable::with_buckets_in(args.buckets, Tracking::new(Global, &stats)) {
        Ok(table) => table,
        Err(err) => {
            eprintln!("Cannot create table with {} buckets: {err}", args.buckets);
            std::process::exit(1);
        }
    };

    println!(
        "Inserting {} {} keys into {} x {} buckets",
        args.count,
        if args.clustered { "clustered" } else { "sequential" },
        table.bucket_count(),
        table.bucket_capacity()
    );

    for i in 0..args.count as u64 {
        let key = if args.clustered { i << 16 } else { i };
        if let Err(err) = table.emplace(key, i) {
            eprintln!("Insert of {key} failed: {err}");
            break;
        }
    }

    table.debug_stats().print();

    println!("=== Bucket Fill ===");
    for (fill, buckets) in table.fill_histogram().into_iter().enumerate() {
        if buckets > 0 {
            println!("{fill:>4} entries: {buckets} buckets");
        }
    }

    println!("=== Allocator ===");
    println!(
        "Allocations: {}, deallocations: {}, live bytes: {}",
        stats.allocations(),
        stats.deallocations(),
        stats.live_bytes()
    );
}
