//! Runs the frame pipeline once and prints a summary.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::process;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use frame_pipeline::config::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_FRAME_COUNT, DEFAULT_PAYLOAD_SIZE, DEFAULT_POOL_CAPACITY,
};
use frame_pipeline::{ChecksumMode, Config, Pipeline, WordOrder};

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Checksum computed by the checksum stage
    Local,
    /// Checksum computed by a peer over the request/ack handshake
    Offload,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    Big,
    Little,
}

#[derive(Parser)]
#[command(name = "frame-pipeline")]
#[command(about = "Push generated frames through a three-stage checksum pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Frame payload size in bytes
    #[arg(short = 's', long, default_value_t = DEFAULT_PAYLOAD_SIZE)]
    payload_size: usize,

    /// Number of frames to push through the pipeline
    #[arg(short = 'n', long, default_value_t = DEFAULT_FRAME_COUNT)]
    frames: usize,

    /// Frame pool capacity
    #[arg(short, long, default_value_t = DEFAULT_POOL_CAPACITY)]
    pool: usize,

    /// Depth of both inter-stage channels
    #[arg(short, long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    channel: usize,

    /// Where checksums are computed
    #[arg(short, long, value_enum, default_value = "local")]
    mode: Mode,

    /// Byte order of checksum words
    #[arg(long, value_enum, default_value = "big")]
    word_order: Order,

    /// Give up on any single wait after this many milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Cap total frame generation memory at this many bytes
    #[arg(long)]
    scratch_budget: Option<usize>,

    /// Print every frame's checksum
    #[arg(short, long)]
    verbose: bool,

    /// Suppress log output (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let mut config = Config::default()
        .with_payload_size(cli.payload_size)
        .with_frame_count(cli.frames)
        .with_pool_capacity(cli.pool)
        .with_channel_capacity(cli.channel)
        .with_mode(match cli.mode {
            Mode::Local => ChecksumMode::LocalCompute,
            Mode::Offload => ChecksumMode::HardwareOffload,
        })
        .with_word_order(match cli.word_order {
            Order::Big => WordOrder::BigEndian,
            Order::Little => WordOrder::LittleEndian,
        });
    if let Some(ms) = cli.timeout_ms {
        config = config.with_wait_timeout(Duration::from_millis(ms));
    }
    if let Some(budget) = cli.scratch_budget {
        config = config.with_scratch_budget(budget);
    }

    let report = match Pipeline::new(config).run() {
        Ok(report) => report,
        Err(failure) => {
            eprintln!("Error: {failure}");
            process::exit(1);
        }
    };

    if cli.verbose {
        for frame in &report.frames {
            println!(
                "frame {:>4}  {:>5} bytes  checksum {:#06X}",
                frame.sequence, frame.size, frame.checksum
            );
        }
    }
    println!(
        "{} frames in {} usec (pool retries {}, ready full waits {}, done full waits {})",
        report.frames.len(),
        report.elapsed.as_micros(),
        report.pool.acquire_retries,
        report.ready.full_waits,
        report.done.full_waits
    );
    if let Some(handshake) = report.handshake {
        println!(
            "handshake: {} requests, {} acks, {} violations",
            handshake.requests, handshake.acks, handshake.violations
        );
    }
}
