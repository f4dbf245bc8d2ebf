use std::{
    env::temp_dir,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{error::ErrorKind, CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use ofio_engine::{AioConfig, AioHandle, IoEngine};

const FILENAME: &str = "ofio_bench_scratch";

#[derive(Parser, Debug)]
#[command(version, about = "Measure offload-io write/read throughput", long_about = None)]
struct Args {
    /// Directory to place the scratch file in. Defaults to the system's
    /// temporary directory; point this at a real NVMe mount for meaningful
    /// numbers. The directory must already exist.
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Transfer size in bytes. Must be a multiple of the block size and
    /// divisible into device-aligned shares across the worker threads.
    #[arg(short, long, default_value_t = 256 * 1024 * 1024)]
    transfer_size: usize,

    /// Device request size in bytes.
    #[arg(short, long, default_value_t = 1024 * 1024)]
    block_size: usize,

    /// Maximum in-flight requests per worker.
    #[arg(short, long, default_value_t = 128)]
    queue_depth: usize,

    /// Issue one request at a time instead of batching.
    #[arg(long, default_value_t = false)]
    single_submit: bool,

    /// Overlap submission with completion polling.
    #[arg(long, default_value_t = false)]
    overlap_events: bool,

    /// Number of worker threads cooperating on each transfer.
    #[arg(short = 'n', long, default_value_t = 4, value_parser = clap::value_parser!(usize))]
    intra_op_parallelism: usize,

    /// Number of timed write/read iterations.
    #[arg(short, long, default_value_t = 5)]
    iterations: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let directory = resolve_directory(args.directory.as_deref());
    let path = directory.join(FILENAME);

    let config = AioConfig::new(
        args.block_size,
        args.queue_depth,
        args.single_submit,
        args.overlap_events,
        args.intra_op_parallelism,
    )
    .unwrap_or_else(|e| Args::command().error(ErrorKind::ValueValidation, e).exit());
    let handle = AioHandle::new(config)?;

    let buffer = handle.new_pinned_buffer(args.transfer_size, 1)?;
    buffer.fill_pattern(&[0xA5, 0x5A, 0xF0, 0x0F]);

    println!(
        "{} bytes per transfer, {} byte blocks, queue depth {}, {} worker(s), \
         single_submit={}, overlap_events={}",
        args.transfer_size,
        args.block_size,
        args.queue_depth,
        args.intra_op_parallelism,
        args.single_submit,
        args.overlap_events,
    );

    let pb = ProgressBar::new(args.iterations as u64 * 2);
    pb.set_style(progress_bar_style());

    let mut write_total = Duration::ZERO;
    let mut read_total = Duration::ZERO;
    for _ in 0..args.iterations {
        pb.set_message("writing");
        let start = Instant::now();
        handle.sync_pwrite(&buffer, &path, 0)?;
        write_total += start.elapsed();
        pb.inc(1);

        pb.set_message("reading");
        let start = Instant::now();
        handle.sync_pread(&buffer, &path, 0)?;
        read_total += start.elapsed();
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let moved = (args.transfer_size * args.iterations) as f64;
    println!(
        "write: {:.2} GiB/s, read: {:.2} GiB/s",
        moved / write_total.as_secs_f64() / (1 << 30) as f64,
        moved / read_total.as_secs_f64() / (1 << 30) as f64,
    );

    handle.free_pinned_buffer(&buffer);
    std::fs::remove_file(&path)?;
    Ok(())
}

/// Scratch-file location: the directory the user asked for, or the system
/// temp dir when none was given.
fn resolve_directory(requested: Option<&Path>) -> PathBuf {
    match requested {
        Some(dir) if dir.is_dir() => dir.to_path_buf(),
        Some(dir) => Args::command()
            .error(
                ErrorKind::ValueValidation,
                format!("{} is not an existing directory", dir.display()),
            )
            .exit(),
        None => temp_dir(),
    }
}

fn progress_bar_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap()
        .progress_chars("##-")
}
