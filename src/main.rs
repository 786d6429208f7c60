use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use env_logger::fmt::Color;
use log::{Level, LevelFilter};

use spats_rust::config::RunConfig;
use spats_rust::io::{read_targets, PairedFastqReader};
use spats_rust::pipeline::{self, Engine, Tally};
use spats_rust::profile::{write_profiles, CountSnapshot};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "spats-rust", author, version, about = "SHAPE-seq read processing and reactivity profiles", arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count, help = "Specify multiple times to increase verbosity level (e.g., -vv for more verbosity)")]
    verbosity: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process paired reads and write counts and reactivities
    Run {
        /// Run configuration (JSON)
        #[arg(short, long)]
        config: String,
        /// Target FASTA file
        targets: String,
        /// R1 FASTQ (plain or gzip)
        r1: String,
        /// R2 FASTQ (plain or gzip)
        r2: String,
        /// Output prefix
        #[arg(short, long, default_value = "spats")]
        output: String,
        /// Also write one TSV row per read pair
        #[arg(long)]
        records: bool,
        #[arg(short = 't', long = "threads", default_value_t = 1)]
        threads: usize,
    },
    /// Merge count snapshots and write reactivities
    Profile {
        /// Count snapshots written by `run`
        #[arg(required = true)]
        snapshots: Vec<String>,
        /// Output TSV (stdout if omitted)
        #[arg(short, long)]
        out: Option<String>,
        /// Keep negative beta / theta values
        #[arg(long)]
        allow_negative: bool,
    },
}

fn init_verbose(verbosity: u8) {
    let filter_level: LevelFilter = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            let level = record.level();
            let mut style = buf.style();
            match record.level() {
                Level::Error => style.set_color(Color::Red),
                Level::Warn => style.set_color(Color::Yellow),
                Level::Info => style.set_color(Color::Green),
                Level::Debug => style.set_color(Color::Blue),
                Level::Trace => style.set_color(Color::Cyan),
            };

            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                style.value(level),
                record.args()
            )
        })
        .filter_level(filter_level)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_verbose(cli.verbosity);
    match cli.command {
        Commands::Run { config, targets, r1, r2, output, records, threads } => {
            run_reads(&config, &targets, &r1, &r2, &output, records, threads)
        }
        Commands::Profile { snapshots, out, allow_negative } => run_profile(&snapshots, out.as_deref(), allow_negative),
    }
}

fn create_output(path: &str) -> Result<BufWriter<File>> {
    let f = File::create(path).with_context(|| format!("cannot create '{}'", path))?;
    Ok(BufWriter::new(f))
}

fn run_reads(config: &str, targets: &str, r1: &str, r2: &str, output: &str, records: bool, threads: usize) -> Result<()> {
    let cfg = RunConfig::from_file(config)?;
    let allow_negative = cfg.allow_negative_values;
    let target_seqs = read_targets(targets)?;
    let engine = Engine::new(cfg, &target_seqs)?;
    let reads = PairedFastqReader::open(r1, r2)?;

    let record_path = format!("{}.pairs.tsv", output);
    let record_out: Option<Box<dyn Write + Send>> =
        if records { Some(Box::new(create_output(&record_path)?)) } else { None };
    let tally = pipeline::run(&engine, reads, record_out, threads.max(1))?;
    print_summary(&tally);

    let snapshot_path = format!("{}.counts", output);
    let snapshot = CountSnapshot::new(tally.counts, vec![r1.to_string(), r2.to_string()]);
    snapshot
        .save_to_file(&snapshot_path)
        .with_context(|| format!("cannot write counts to '{}'", snapshot_path))?;
    println!("counts saved: {}", snapshot_path);

    let profile_path = format!("{}.reactivities.tsv", output);
    let mut out = create_output(&profile_path)?;
    write_profiles(&mut out, &snapshot.counts, 0, 1, allow_negative)?;
    out.flush()?;
    println!("reactivities saved: {}", profile_path);
    if records {
        println!("pair records saved: {}", record_path);
    }
    Ok(())
}

fn run_profile(snapshots: &[String], out_path: Option<&str>, allow_negative: bool) -> Result<()> {
    let merged = CountSnapshot::merge_files(snapshots)?;
    log::info!("merged {} snapshot(s) from {}", snapshots.len(), merged.meta.inputs.join(", "));
    match out_path {
        Some(p) => {
            let mut out = create_output(p)?;
            write_profiles(&mut out, &merged.counts, 0, 1, allow_negative)?;
            out.flush()?;
            println!("snapshots: {}", snapshots.len());
            println!("fragments: {}", merged.counts.kept());
            println!("reactivities saved: {}", p);
        }
        // 表格直接写到 stdout，不再打印摘要
        None => {
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            write_profiles(&mut out, &merged.counts, 0, 1, allow_negative)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn print_summary(tally: &Tally) {
    println!("pairs: {}", tally.pairs);
    println!("counted: {}", tally.counts.kept());
    println!("successes: {}", tally.successes);
    for (kind, n) in &tally.failures {
        println!("failure {}: {}", kind.name(), n);
    }
    println!(
        "overlap paths: fast {}, slow {}, none {}",
        tally.fragments.fast, tally.fragments.slow, tally.fragments.none
    );
    println!("reverse_order: {}", tally.reverse_order);
    println!("cache_hits: {}", tally.cache_hits);
    if tally.unique_barcodes > 0 {
        println!("unique_barcodes: {}", tally.unique_barcodes);
        println!("barcode_skipped: {}", tally.barcode_skipped);
    }
}
