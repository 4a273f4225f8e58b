// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! streamsync CLI
//!
//! Builds a `source -> [batcher] -> [queue] -> sink` pipeline from a YAML
//! config plus flags, runs it on the system clock and reports what the sink
//! did with every buffer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use streamsync::prelude::*;
use streamsync::{LeakyPolicy, PipelineConfig, QueueConfig};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "streamsync")]
#[command(author, version, about = "Clock-synchronized pipeline runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline until EOS, an error or the duration limit
    Run(RunArgs),

    /// Print the default pipeline config as YAML
    ConfigTemplate,
}

#[derive(Args)]
struct RunArgs {
    /// Pipeline config file (YAML)
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Source frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Stop with EOS after this many buffers
    #[arg(long)]
    num_buffers: Option<u64>,

    /// Pace the source on the clock instead of producing as fast as possible
    #[arg(long)]
    live: bool,

    /// Insert a batcher emitting batches of this many milliseconds
    #[arg(long, value_name = "MS")]
    batch_ms: Option<f64>,

    /// Queue buffer limit
    #[arg(long)]
    queue_max_count: Option<u32>,

    /// What a full queue does
    #[arg(long, value_enum)]
    leaky: Option<Leaky>,

    /// Link the sink directly, without a queue
    #[arg(long, conflicts_with_all = ["queue_max_count", "leaky"])]
    no_queue: bool,

    /// Render as soon as buffers arrive
    #[arg(long)]
    no_sync: bool,

    /// Lateness after which a buffer is dropped
    #[arg(long, value_name = "MS")]
    max_lateness_ms: Option<f64>,

    /// Simulated per-buffer render time
    #[arg(long, value_name = "MS", default_value = "0")]
    render_delay_ms: u64,

    /// Stop after this many seconds even without EOS
    #[arg(long, value_name = "SECS")]
    duration_secs: Option<f64>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Leaky {
    None,
    Upstream,
    Downstream,
}

impl From<Leaky> for LeakyPolicy {
    fn from(leaky: Leaky) -> Self {
        match leaky {
            Leaky::None => LeakyPolicy::None,
            Leaky::Upstream => LeakyPolicy::Upstream,
            Leaky::Downstream => LeakyPolicy::Downstream,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {}", path.display()))?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            let file_appender = tracing_appender::rolling::never(&dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Stands in for a GPU upload: sleeps for a fixed time per buffer.
struct SimulatedUpload {
    delay: Duration,
    bytes: AtomicU64,
}

impl SinkRenderer for SimulatedUpload {
    fn render(&self, buffer: &Buffer) -> FlowResult {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.bytes
            .fetch_add(buffer.size() as u64, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

fn effective_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(fps) = args.fps {
        config.source.fps = fps;
    }
    if args.num_buffers.is_some() {
        config.source.num_buffers = args.num_buffers;
    }
    if args.live {
        config.source.is_live = true;
    }
    if let Some(ms) = args.batch_ms {
        let batcher = config.batcher.get_or_insert_with(Default::default);
        batcher.target_duration = ClockTime::from_seconds_f64(ms / 1e3);
    }
    if args.no_queue {
        config.queue = None;
    } else if args.queue_max_count.is_some() || args.leaky.is_some() {
        let queue = config.queue.get_or_insert_with(QueueConfig::default);
        if let Some(count) = args.queue_max_count {
            queue.max_count = count;
        }
        if let Some(leaky) = args.leaky {
            queue.leaky = leaky.into();
        }
    }
    if args.no_sync {
        config.sink.sync = false;
    }
    if let Some(ms) = args.max_lateness_ms {
        if !ms.is_finite() || ms < 0.0 {
            bail!("--max-lateness-ms must be a non-negative number, got {}", ms);
        }
        config.sink.max_lateness = Some(ClockTime::from_seconds_f64(ms / 1e3));
    }

    config.validate()?;
    Ok(config)
}

#[derive(Default)]
struct RunReport {
    qos: u64,
    underruns: u64,
    overruns: u64,
    errors: Vec<String>,
    eos: bool,
}

fn run(args: RunArgs) -> Result<()> {
    let config = effective_config(&args)?;
    tracing::debug!("Effective config:\n{}", config.to_yaml_string()?);

    let pipeline = Pipeline::new(&config.name);
    let ctx = pipeline.context().clone();

    let renderer = Arc::new(SimulatedUpload {
        delay: Duration::from_millis(args.render_delay_ms),
        bytes: AtomicU64::new(0),
    });

    let source = TestSource::new("source", config.source.clone(), &ctx)?;
    pipeline.add(source.clone())?;
    let mut chain = vec!["source"];

    let batcher = config
        .batcher
        .clone()
        .map(|batcher| Batcher::new("batcher", batcher, &ctx));
    if let Some(batcher) = &batcher {
        pipeline.add(batcher.clone())?;
        chain.push("batcher");
    }

    let queue = config
        .queue
        .clone()
        .map(|queue| Queue::new("queue", queue, &ctx));
    if let Some(queue) = &queue {
        pipeline.add(queue.clone())?;
        chain.push("queue");
    }

    let sink = SyncSink::new("sink", config.sink.clone(), renderer.clone(), &ctx);
    pipeline.add(sink.clone())?;
    chain.push("sink");

    pipeline
        .link_many(&chain)
        .with_context(|| format!("Failed to link {}", chain.join(" -> ")))?;

    tracing::info!("[{}] Running {}", config.name, chain.join(" -> "));
    let started = Instant::now();
    pipeline
        .set_state(State::Playing)
        .context("Failed to start pipeline")?;

    let deadline = args
        .duration_secs
        .map(|secs| started + Duration::from_secs_f64(secs.max(0.0)));
    let report = watch_bus(&pipeline, deadline);

    pipeline
        .set_state(State::Stopped)
        .context("Failed to stop pipeline")?;
    let elapsed = started.elapsed();

    let source_stats = source.stats();
    let sink_stats = sink.stats();
    println!("pipeline/{} finished in {:.3}s", config.name, elapsed.as_secs_f64());
    println!(
        "  source:  produced={} failed={}",
        source_stats.produced, source_stats.failed
    );
    if let Some(batcher) = &batcher {
        let stats = batcher.stats();
        println!(
            "  batcher: buffers_in={} batches_out={}",
            stats.buffers_in, stats.batches_out
        );
    }
    if let Some(queue) = &queue {
        let stats = queue.stats();
        println!(
            "  queue:   pushed={} popped={} dropped={} underruns={} overruns={}",
            stats.pushed, stats.popped, stats.dropped, report.underruns, report.overruns
        );
    }
    println!(
        "  sink:    rendered={} late={} dropped_late={} out_of_segment={} qos={}",
        sink_stats.rendered,
        sink_stats.late,
        sink_stats.dropped_late,
        sink_stats.out_of_segment,
        report.qos
    );
    println!(
        "           total_wait={} bytes={} eos={}",
        sink_stats.total_wait,
        renderer.bytes.load(Ordering::Relaxed),
        report.eos
    );

    if let Some(first) = report.errors.first() {
        bail!("Pipeline reported {} error(s), first: {}", report.errors.len(), first);
    }
    Ok(())
}

/// Drain bus messages until EOS, an error or `deadline`.
fn watch_bus(pipeline: &Pipeline, deadline: Option<Instant>) -> RunReport {
    let mut report = RunReport::default();
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("[{}] Duration limit reached", pipeline.name());
            return report;
        }

        let Some(message) = pipeline.bus().timed_pop(Duration::from_millis(100)) else {
            continue;
        };
        match message {
            BusMessage::Eos { element } => {
                tracing::info!("[{}] EOS", element);
                report.eos = true;
                return report;
            }
            BusMessage::Error { element, message } => {
                tracing::error!("[{}] {}", element, message);
                report.errors.push(format!("{}: {}", element, message));
                return report;
            }
            BusMessage::Qos(qos) => {
                report.qos += 1;
                tracing::debug!(
                    "[{}] QoS: {} ms late at running time {} (dropped={})",
                    qos.element,
                    qos.lateness / 1_000_000,
                    qos.running_time,
                    qos.dropped
                );
            }
            BusMessage::Underrun { .. } => report.underruns += 1,
            BusMessage::Overrun { .. } => report.overruns += 1,
            BusMessage::AsyncDone { element } => tracing::debug!("[{}] Prerolled", element),
            BusMessage::StateChanged { element, old, new } => {
                tracing::debug!("[{}] {} -> {}", element, old, new)
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let _guard = init_logging(args.log_file.as_deref())?;
            run(args)
        }
        Commands::ConfigTemplate => {
            print!("{}", PipelineConfig::default().to_yaml_string()?);
            Ok(())
        }
    }
}
